//! Operator placement and bracket balance of the flattened structure stream.

use super::token::Token;
use crate::core::{DbError, Result};

/// Validates `structure`; `raw` holds the lexeme of each token for messages.
pub fn validate(structure: &[Token], raw: &[String]) -> Result<()> {
    let error = |position: usize, message: &str| {
        let token = raw
            .get(position)
            .cloned()
            .unwrap_or_else(|| structure[position].to_string());
        Err(DbError::syntax(token, position, message))
    };

    // Open-bracket positions, innermost last.
    let mut open: Vec<usize> = Vec::new();
    // Operator seen at each nesting level (index 0 is the top level).
    let mut level_ops: Vec<Option<Token>> = vec![None];

    for (position, token) in structure.iter().enumerate() {
        let previous = position.checked_sub(1).map(|p| structure[p]);
        let last = position + 1 == structure.len();

        match token {
            Token::And | Token::Or => {
                match previous {
                    None => return error(position, "expression cannot start with an operator"),
                    Some(Token::Open) => {
                        return error(position, "group cannot start with an operator");
                    }
                    Some(p) if p.is_operator() => {
                        return error(position, "operators cannot be adjacent");
                    }
                    _ => {}
                }
                if last {
                    return error(position, "expression cannot end with an operator");
                }
                let level = level_ops.last_mut().ok_or_else(|| {
                    DbError::Internal("filter nesting stack is empty".to_string())
                })?;
                if level.is_some_and(|seen| seen != *token) {
                    return error(position, "mixing && and || at one level requires brackets");
                }
                *level = Some(*token);
            }
            Token::Open => {
                if matches!(previous, Some(Token::Arg(_)) | Some(Token::Close)) {
                    return error(position, "'(' must follow an operator or another '('");
                }
                open.push(position);
                level_ops.push(None);
            }
            Token::Close => {
                match previous {
                    None => return error(position, "expression cannot start with ')'"),
                    Some(Token::Open) => return error(position, "empty group"),
                    Some(p) if p.is_operator() => {
                        return error(position, "')' cannot follow an operator");
                    }
                    _ => {}
                }
                if open.pop().is_none() {
                    return error(position, "unbalanced ')'");
                }
                level_ops.pop();
            }
            Token::Arg(_) => {
                if matches!(previous, Some(Token::Arg(_)) | Some(Token::Close)) {
                    return error(position, "argument must follow an operator or '('");
                }
            }
        }
    }

    if let Some(position) = open.pop() {
        return error(position, "unbalanced '('");
    }
    Ok(())
}

/// Grouped form of a validated structure stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Arg(usize),
    /// `op` is `None` only for an empty stream.
    Group { op: Option<Token>, children: Vec<Node> },
}

/// Groups a stream that already passed [`validate`].
pub fn tree(structure: &[Token]) -> Node {
    fn group(structure: &[Token], pos: &mut usize) -> Node {
        let mut children = Vec::new();
        let mut op = None;
        while let Some(token) = structure.get(*pos) {
            *pos += 1;
            match token {
                Token::Arg(i) => children.push(Node::Arg(*i)),
                Token::Open => children.push(group(structure, pos)),
                Token::Close => break,
                Token::And | Token::Or => op = Some(*token),
            }
        }
        if children.len() == 1 {
            children.pop().unwrap_or(Node::Group { op: None, children: Vec::new() })
        } else {
            Node::Group { op, children }
        }
    }

    let mut pos = 0;
    group(structure, &mut pos)
}
