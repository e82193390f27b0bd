pub mod error;
pub mod schema;
pub mod types;
pub mod value;

pub use error::{BackendKind, DbError, ErrorKind, OperationContext, Result};
pub use schema::{
    ColumnDef, ColumnDefault, ColumnType, Includes, Relation, SchemaRegistry, TableSchema,
    TimestampColumn,
};
pub use types::{Action, Backend};
pub use value::{Key, Record};
