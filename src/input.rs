//! Task list parsing for the command line front end.
//!
//! One task per line: `URL` or `URL<whitespace>NAME`. Blank lines and lines
//! starting with `#` are ignored; lines that do not parse are collected as
//! skipped instead of failing the whole list.

use tracing::{debug, instrument};

use crate::download::FetchTask;

/// A line that could not be turned into a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line_number: usize,
    /// Raw line content (trimmed).
    pub content: String,
    /// Why it was rejected.
    pub reason: String,
}

/// Tasks parsed from a list, plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct TaskList {
    /// Parsed tasks, in line order.
    pub tasks: Vec<FetchTask>,
    /// Rejected lines.
    pub skipped: Vec<SkippedLine>,
}

impl TaskList {
    /// Number of parsed tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no task was parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Parses a task list.
///
/// # Example
///
/// ```
/// use dedup_fetcher::input::parse_task_list;
///
/// let list = parse_task_list(
///     "# DICRIM\nhttps://example.fr/a.pdf\nhttps://example.fr/b?id=2 b.pdf\nnot-a-url\n",
/// );
/// assert_eq!(list.len(), 2);
/// assert_eq!(list.tasks[1].destination(), "b.pdf");
/// assert_eq!(list.skipped.len(), 1);
/// ```
#[instrument(skip(input), fields(input_len = input.len()))]
#[must_use]
pub fn parse_task_list(input: &str) -> TaskList {
    let mut list = TaskList::default();

    for (line_index, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (location, name) = match line.split_once(char::is_whitespace) {
            Some((location, name)) => (location, Some(name.trim())),
            None => (line, None),
        };

        match FetchTask::parse(location, name) {
            Ok(task) => list.tasks.push(task),
            Err(e) => {
                debug!(line = line_index + 1, error = %e, "skipping task line");
                list.skipped.push(SkippedLine {
                    line_number: line_index + 1,
                    content: line.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!(
        tasks = list.tasks.len(),
        skipped = list.skipped.len(),
        "parsed task list"
    );
    list
}
