//! Parsing of the CRLF line protocol.
//!
//! One line is one command. Keywords are upper-case; keys are single
//! whitespace-free tokens; a SET value runs to the end of the line and may
//! contain spaces; vector literals are `[v1,v2,...]`.

/// A parsed client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Insert { key: String, vector: Vec<f32> },
    Delete { key: String },
    Search { vector: Vec<f32>, k: usize },
    Begin,
    Commit,
    Rollback,
    Cas {
        key: String,
        expected: Option<String>,
        value: String,
    },
    Quit,
}

/// Parse one protocol line. The error string is sent back verbatim after
/// `ERROR: `.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim_start()),
        None => (line, ""),
    };

    match keyword {
        "GET" => Ok(Command::Get {
            key: single_token(rest, "GET")?,
        }),
        "SET" => {
            let (key, value) = match rest.split_once(' ') {
                Some((k, v)) => (k, v),
                None if !rest.is_empty() => (rest, ""),
                None => return Err("SET requires a key and a value".into()),
            };
            Ok(Command::Set {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        "INSERT" => {
            let (key, literal) = rest
                .split_once(char::is_whitespace)
                .ok_or("INSERT requires a key and a vector")?;
            Ok(Command::Insert {
                key: key.to_string(),
                vector: parse_vector(literal.trim())?,
            })
        }
        "DELETE" => Ok(Command::Delete {
            key: single_token(rest, "DELETE")?,
        }),
        "SEARCH" => {
            let (literal, top) = rest
                .split_once(" TOP ")
                .ok_or("SEARCH requires TOP <k>")?;
            let k = top
                .trim()
                .parse::<usize>()
                .map_err(|_| "TOP requires a positive integer".to_string())?;
            if k == 0 {
                return Err("TOP requires a positive integer".into());
            }
            Ok(Command::Search {
                vector: parse_vector(literal.trim())?,
                k,
            })
        }
        "BEGIN" => no_args(rest, "BEGIN", Command::Begin),
        "COMMIT" => no_args(rest, "COMMIT", Command::Commit),
        "ROLLBACK" => no_args(rest, "ROLLBACK", Command::Rollback),
        "CAS" => {
            let mut parts = rest.splitn(3, ' ');
            let key = parts.next().filter(|s| !s.is_empty());
            let old = parts.next();
            let new = parts.next();
            match (key, old, new) {
                (Some(key), Some(old), Some(new)) => Ok(Command::Cas {
                    key: key.to_string(),
                    expected: (old != "null").then(|| old.to_string()),
                    value: new.to_string(),
                }),
                _ => Err("CAS requires <key> <old>|null <new>".into()),
            }
        }
        "QUIT" => no_args(rest, "QUIT", Command::Quit),
        _ => Err("Unknown command".into()),
    }
}

fn single_token(rest: &str, keyword: &str) -> Result<String, String> {
    let key = rest.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("{} requires exactly one key", keyword));
    }
    Ok(key.to_string())
}

fn no_args(rest: &str, keyword: &str, cmd: Command) -> Result<Command, String> {
    if rest.trim().is_empty() {
        Ok(cmd)
    } else {
        Err(format!("{} takes no arguments", keyword))
    }
}

/// Parse a `[v1,v2,...]` literal into f32 components.
fn parse_vector(literal: &str) -> Result<Vec<f32>, String> {
    let inner = literal
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or("vector literal must be [v1,v2,...]")?;
    if inner.trim().is_empty() {
        return Err("empty vector".into());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| format!("bad vector component '{}'", part.trim()))
        })
        .collect()
}
