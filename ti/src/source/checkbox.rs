//! Minimal markdown task parsers shipped with the `ti` binary
//!
//! The indexing core treats parsing as an external concern. These parsers
//! understand just enough markup for the binary to be useful on its own:
//! checkbox list items with `#tags`, `@context`, `project:` and date fields.

use chrono::NaiveDate;
use regex::Regex;

use super::{MetadataTaskSource, ParseError, TaskParser, split_frontmatter};
use crate::domain::{DocumentMetadata, Task, TaskMetadata};

/// Parses `- [ ] text` list items
#[derive(Debug, Clone)]
pub struct CheckboxParser {
    item: Regex,
    tag: Regex,
    field: Regex,
    context: Regex,
}

impl CheckboxParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            item: Regex::new(r"^\s*[-*+] \[(.)\]\s+(.*)$")?,
            tag: Regex::new(r"(?:^|\s)(#[\w/-]+)")?,
            field: Regex::new(r"(?:^|\s)(due|start|scheduled|done|project|repeat):(\S+)")?,
            context: Regex::new(r"(?:^|\s)@([\w-]+)")?,
        })
    }

    fn parse_line(&self, path: &str, line: usize, text: &str, headings: &[String]) -> Result<Option<Task>, ParseError> {
        let Some(caps) = self.item.captures(text) else {
            return Ok(None);
        };
        let status = caps[1].to_string();
        let body = caps[2].trim();

        let mut metadata = TaskMetadata {
            heading: headings.to_vec(),
            ..Default::default()
        };
        for tag in self.tag.captures_iter(body) {
            metadata.tags.push(tag[1].to_string());
        }
        if let Some(ctx) = self.context.captures(body) {
            metadata.context = Some(ctx[1].to_string());
        }
        for field in self.field.captures_iter(body) {
            let value = &field[2];
            match &field[1] {
                "project" => metadata.project = Some(value.to_string()),
                "repeat" => metadata.recurrence = Some(value.to_string()),
                key => {
                    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                        .map_err(|e| ParseError(format!("{}:{}: bad {} date '{}': {}", path, line + 1, key, value, e)))?;
                    match key {
                        "due" => metadata.due_date = Some(date),
                        "start" => metadata.start_date = Some(date),
                        "scheduled" => metadata.scheduled_date = Some(date),
                        _ => metadata.completed_date = Some(date),
                    }
                }
            }
        }

        let stripped = self.field.replace_all(body, "");
        let stripped = self.context.replace_all(&stripped, "");
        let content = self.tag.replace_all(&stripped, "").split_whitespace().collect::<Vec<_>>().join(" ");

        Ok(Some(Task {
            id: format!("{}-L{}", path, line),
            file_path: path.to_string(),
            line,
            completed: matches!(status.as_str(), "x" | "X"),
            status,
            content,
            original_markdown: text.to_string(),
            metadata,
        }))
    }
}

impl TaskParser for CheckboxParser {
    fn parse(&self, path: &str, content: &str, _metadata: &DocumentMetadata) -> Result<Vec<Task>, ParseError> {
        let skip = split_frontmatter(content).map(|yaml| yaml.lines().count() + 2).unwrap_or(0);
        let mut headings: Vec<(usize, String)> = Vec::new();
        let mut tasks = Vec::new();

        for (line, text) in content.lines().enumerate().skip(skip) {
            let level = text.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&level) && text[level..].starts_with(' ') {
                headings.retain(|(l, _)| *l < level);
                headings.push((level, text[level..].trim().to_string()));
                continue;
            }
            let path_names: Vec<String> = headings.iter().map(|(_, h)| h.clone()).collect();
            if let Some(task) = self.parse_line(path, line, text, &path_names)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

/// Turns a frontmatter key into a single file-level task
///
/// `task: "Write report"` produces a task with that text; `task: true`
/// uses the file stem. `status: done` marks it completed.
#[derive(Debug, Clone)]
pub struct FrontmatterTaskSource {
    key: String,
}

impl FrontmatterTaskSource {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for FrontmatterTaskSource {
    fn default() -> Self {
        Self::new("task")
    }
}

impl MetadataTaskSource for FrontmatterTaskSource {
    fn tasks_for(&self, path: &str, _content: &str, metadata: &DocumentMetadata) -> Vec<Task> {
        let content = match metadata.frontmatter.get(&self.key) {
            Some(serde_json::Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Some(serde_json::Value::Bool(true)) => {
                let name = path.rsplit('/').next().unwrap_or(path);
                name.strip_suffix(".md").unwrap_or(name).to_string()
            }
            _ => return Vec::new(),
        };

        let completed = matches!(metadata.frontmatter_str("status"), Some("done" | "completed"));
        let mut task = Task::new(format!("{}#file", path), path, 0, content);
        task.completed = completed;
        task.status = if completed { "x" } else { " " }.to_string();
        task.original_markdown = format!("{}: {}", self.key, task.content);
        task.metadata.file_level = true;
        vec![task]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_metadata;

    fn parse(content: &str) -> Vec<Task> {
        let parser = CheckboxParser::new().unwrap();
        parser.parse("notes/a.md", content, &DocumentMetadata::default()).unwrap()
    }

    #[test]
    fn test_parse_checkbox_items() {
        let tasks = parse("# Work\n- [ ] Write plan #docs @desk due:2024-05-01\n- [x] Ship it project:alpha\nplain line\n");

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "notes/a.md-L1");
        assert_eq!(tasks[0].content, "Write plan");
        assert_eq!(tasks[0].metadata.tags, vec!["#docs"]);
        assert_eq!(tasks[0].metadata.context.as_deref(), Some("desk"));
        assert_eq!(tasks[0].metadata.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(tasks[0].metadata.heading, vec!["Work"]);
        assert!(tasks[1].completed);
        assert_eq!(tasks[1].metadata.project.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_frontmatter_lines_are_skipped() {
        let tasks = parse("---\nnote: \"- [ ] not a task\"\n---\n- [ ] real\n");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].line, 3);
    }

    #[test]
    fn test_bad_date_is_parse_error() {
        let parser = CheckboxParser::new().unwrap();
        let result = parser.parse("a.md", "- [ ] x due:tomorrow\n", &DocumentMetadata::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_heading_nesting() {
        let tasks = parse("# A\n## B\n- [ ] one\n# C\n- [ ] two\n");
        assert_eq!(tasks[0].metadata.heading, vec!["A", "B"]);
        assert_eq!(tasks[1].metadata.heading, vec!["C"]);
    }

    #[test]
    fn test_frontmatter_task_source() {
        let content = "---\ntask: true\nstatus: done\n---\nbody\n";
        let meta = parse_metadata("projects/launch.md", content).unwrap();
        let tasks = FrontmatterTaskSource::default().tasks_for("projects/launch.md", content, &meta);

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].content, "launch");
        assert!(tasks[0].completed);
        assert!(tasks[0].metadata.file_level);

        let none = FrontmatterTaskSource::default().tasks_for("a.md", "", &DocumentMetadata::default());
        assert!(none.is_empty());
    }
}
