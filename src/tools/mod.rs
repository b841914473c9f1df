//! Tool-block grammar
//!
//! Backend responses carry side effects as fenced blocks whose opening fence
//! is tagged `bash`, `write:<path>`, `read:<path>`, or `search:<query>`.
//! Any other fenced block is ignored.

mod executor;

pub use executor::{ExecutionLog, ToolExecutor};

/// A parsed tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBlock {
    Bash(String),
    Write { path: String, body: String },
    Read(String),
    Search(String),
}

impl ToolBlock {
    /// The tool tag, used for telemetry labels
    pub fn tool_type(&self) -> &'static str {
        match self {
            Self::Bash(_) => "bash",
            Self::Write { .. } => "write",
            Self::Read(_) => "read",
            Self::Search(_) => "search",
        }
    }
}

/// Parse fenced tool blocks out of a backend response, in source order.
pub fn parse_blocks(response: &str) -> Vec<ToolBlock> {
    let mut blocks = Vec::new();
    let mut in_block = false;
    let mut tag: Option<BlockTag> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if in_block {
                if let Some(tag) = tag.take() {
                    blocks.push(tag.into_block(body.join("\n")));
                }
                in_block = false;
                body.clear();
            } else {
                tag = BlockTag::parse(&trimmed[3..]);
                // Unknown tags open an ignored block so their body is not
                // misread as top-level text
                in_block = true;
            }
        } else if in_block {
            body.push(line);
        }
    }

    blocks
}

/// Recognized opening-fence tags
enum BlockTag {
    Bash,
    Write(String),
    Read(String),
    Search(String),
}

impl BlockTag {
    fn parse(marker: &str) -> Option<Self> {
        if marker == "bash" {
            Some(Self::Bash)
        } else if let Some(path) = marker.strip_prefix("write:") {
            Some(Self::Write(path.trim().to_string()))
        } else if let Some(path) = marker.strip_prefix("read:") {
            Some(Self::Read(path.trim().to_string()))
        } else if let Some(query) = marker.strip_prefix("search:") {
            Some(Self::Search(query.trim().to_string()))
        } else {
            None
        }
    }

    fn into_block(self, body: String) -> ToolBlock {
        match self {
            Self::Bash => ToolBlock::Bash(body),
            Self::Write(path) => ToolBlock::Write { path, body },
            Self::Read(path) => ToolBlock::Read(path),
            Self::Search(query) => ToolBlock::Search(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bash_block() {
        let response = "Running the tests now.\n```bash\ncargo test\n```\nDone.";
        let blocks = parse_blocks(response);
        assert_eq!(blocks, vec![ToolBlock::Bash("cargo test".to_string())]);
    }

    #[test]
    fn test_parse_write_block() {
        let response = "```write:src/lib.rs\nfn main() {}\n```";
        let blocks = parse_blocks(response);
        assert_eq!(
            blocks,
            vec![ToolBlock::Write {
                path: "src/lib.rs".to_string(),
                body: "fn main() {}".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_read_and_search() {
        let response = "```read:README.md\n```\n```search:TODO\n```";
        let blocks = parse_blocks(response);
        assert_eq!(
            blocks,
            vec![
                ToolBlock::Read("README.md".to_string()),
                ToolBlock::Search("TODO".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_tags_ignored() {
        let response = "```python\nprint('hi')\n```\n```bash\nls\n```\n```json\n{}\n```";
        let blocks = parse_blocks(response);
        assert_eq!(blocks, vec![ToolBlock::Bash("ls".to_string())]);
    }

    #[test]
    fn test_multiline_body_preserved() {
        let response = "```write:a.txt\nline one\n\nline three\n```";
        let blocks = parse_blocks(response);
        assert_eq!(
            blocks,
            vec![ToolBlock::Write {
                path: "a.txt".to_string(),
                body: "line one\n\nline three".to_string(),
            }]
        );
    }

    #[test]
    fn test_blocks_in_source_order() {
        let response = "```bash\nfirst\n```\ntext\n```write:x\nsecond\n```\n```bash\nthird\n```";
        let blocks = parse_blocks(response);
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[0], ToolBlock::Bash(ref c) if c == "first"));
        assert!(matches!(blocks[1], ToolBlock::Write { .. }));
        assert!(matches!(blocks[2], ToolBlock::Bash(ref c) if c == "third"));
    }

    #[test]
    fn test_empty_response() {
        assert!(parse_blocks("").is_empty());
        assert!(parse_blocks("no blocks here").is_empty());
    }

    #[test]
    fn test_unterminated_block_dropped() {
        let response = "```bash\necho hi";
        assert!(parse_blocks(response).is_empty());
    }
}
