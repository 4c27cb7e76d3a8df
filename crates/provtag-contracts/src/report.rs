use serde::Serialize;

pub const MESSAGE_CHUNK_LIMIT: usize = 4096;

const FENCE: &str = "```";
const FENCE_CLOSE: &str = "\n```";

const MARKDOWN_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading { text: String },
    CodeBlock { text: String, language: String },
    Quote { text: String },
    PlainLine { text: String },
}

impl Block {
    pub fn heading(text: impl Into<String>) -> Self {
        Self::Heading { text: text.into() }
    }

    pub fn code(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self::CodeBlock {
            text: text.into(),
            language: language.into(),
        }
    }

    pub fn quote(text: impl Into<String>) -> Self {
        Self::Quote { text: text.into() }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainLine { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Heading { text }
            | Self::CodeBlock { text, .. }
            | Self::Quote { text }
            | Self::PlainLine { text } => text,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Heading { text } => format!("*{}*", escape_markdown(text)),
            Self::PlainLine { text } => escape_markdown(text),
            Self::Quote { text } => {
                if text.is_empty() {
                    return ">".to_string();
                }
                text.lines()
                    .map(|line| format!(">{}", escape_markdown(line)))
                    .collect::<Vec<String>>()
                    .join("\n")
            }
            Self::CodeBlock { text, language } => {
                format!("```{}\n{}\n```", language, escape_code(text))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    blocks: Vec<Block>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(Block::render)
            .collect::<Vec<String>>()
            .join("\n")
    }
}

pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if MARKDOWN_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub fn escape_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '`' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Splits a rendered message on line boundaries into chunks of at most `limit`
/// characters. Lines longer than `limit` are cut. A code block that spans a
/// boundary is closed at the end of one chunk and reopened at the start of the
/// next, so every chunk renders on its own.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut splitter = Splitter {
        limit: limit.max(1),
        chunks: Vec::new(),
        current: None,
        fence: None,
    };
    for line in text.split('\n') {
        splitter.push_line(line);
    }
    splitter.finish()
}

struct Splitter {
    limit: usize,
    chunks: Vec<String>,
    current: Option<(String, usize)>,
    // opening line of the code block the current chunk ends inside
    fence: Option<String>,
}

impl Splitter {
    fn push_line(&mut self, line: &str) {
        let line_len = line.chars().count();
        let is_fence = line.starts_with(FENCE);
        let closes = is_fence && self.fence.is_some();
        let after = match (is_fence, &self.fence) {
            (true, Some(_)) => None,
            (true, None) => Some(line.to_string()),
            (false, open) => open.clone(),
        };
        let reserve = if after.is_some() { FENCE_CLOSE.len() } else { 0 };

        if let Some((chunk, len)) = self.current.as_mut() {
            if *len + 1 + line_len + reserve <= self.limit {
                chunk.push('\n');
                chunk.push_str(line);
                *len += 1 + line_len;
                self.fence = after;
                return;
            }
        }
        self.flush();
        if closes {
            self.fence = None;
            return;
        }

        let prefix = match &self.fence {
            Some(open) => format!("{open}\n"),
            None => String::new(),
        };
        let prefix_len = prefix.chars().count();
        if prefix_len + line_len + reserve <= self.limit {
            self.current = Some((format!("{prefix}{line}"), prefix_len + line_len));
        } else {
            let suffix = if after.is_some() { FENCE_CLOSE } else { "" };
            self.hard_cut(&prefix, line, suffix);
        }
        self.fence = after;
    }

    fn hard_cut(&mut self, prefix: &str, line: &str, suffix: &str) {
        let (prefix, suffix) = if prefix.chars().count() + suffix.len() < self.limit {
            (prefix, suffix)
        } else {
            ("", "")
        };
        let prefix_len = prefix.chars().count();
        let width = self.limit - prefix_len - suffix.len();
        let chars: Vec<char> = line.chars().collect();
        let mut pieces = chars.chunks(width).peekable();
        while let Some(piece) = pieces.next() {
            let piece: String = piece.iter().collect();
            if pieces.peek().is_some() {
                self.chunks.push(format!("{prefix}{piece}{suffix}"));
            } else {
                let len = prefix_len + piece.chars().count();
                self.current = Some((format!("{prefix}{piece}"), len));
            }
        }
    }

    fn flush(&mut self) {
        let Some((mut chunk, _)) = self.current.take() else {
            return;
        };
        if let Some(open) = self.fence.as_deref() {
            // an opener with no content yet moves to the next chunk
            if chunk == open {
                return;
            }
            let dangling = format!("\n{open}");
            if chunk.ends_with(&dangling) {
                chunk.truncate(chunk.len() - dangling.len());
            } else {
                chunk.push_str(FENCE_CLOSE);
            }
        }
        self.chunks.push(chunk);
    }

    fn finish(mut self) -> Vec<String> {
        if let Some((chunk, _)) = self.current.take() {
            self.chunks.push(chunk);
        }
        if self.chunks.is_empty() {
            self.chunks.push(String::new());
        }
        self.chunks
    }
}
