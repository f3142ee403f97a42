//! Batch workloads
//!
//! Line-oriented workload files:
//!
//! ```text
//! # comment
//! 1 5          <priority> <time_limit>: create a process
//! SLEEP 3      pause for 3 ticks
//! ```

use crate::{KernelError, KernelResult};

/// One batch directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCommand {
    /// Create an untracked process
    Spawn { priority: u32, time_limit: u32 },
    /// Pause for a number of ticks
    Sleep(u32),
}

/// Parse a batch workload
pub fn parse_batch(source: &str) -> KernelResult<Vec<BatchCommand>> {
    let mut commands = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = text.split_whitespace().collect();
        let command = match fields.as_slice() {
            [keyword, ticks] if keyword.eq_ignore_ascii_case("SLEEP") => {
                BatchCommand::Sleep(number(line, "sleep ticks", ticks)?)
            }
            [keyword, ..] if keyword.eq_ignore_ascii_case("SLEEP") => {
                return Err(batch_error(line, "SLEEP takes exactly one argument"));
            }
            [priority, time_limit] => {
                let time_limit = number(line, "time limit", time_limit)?;
                if time_limit == 0 {
                    return Err(batch_error(line, "time limit must be non-zero"));
                }
                BatchCommand::Spawn { priority: number(line, "priority", priority)?, time_limit }
            }
            _ => return Err(batch_error(line, format!("expected '<priority> <time_limit>', got '{}'", text))),
        };
        commands.push(command);
    }

    Ok(commands)
}

fn number(line: usize, what: &str, field: &str) -> KernelResult<u32> {
    field
        .parse()
        .map_err(|_| batch_error(line, format!("invalid {} '{}'", what, field)))
}

fn batch_error(line: usize, reason: impl Into<String>) -> KernelError {
    KernelError::Batch { line, reason: reason.into() }
}
