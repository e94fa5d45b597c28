//! Block-level structure shared by the PDF and DOCX readers.
//!
//! Both readers reduce a document to a sequence of [`Block`]s; rendering turns that
//! sequence into the lightweight markdown the completion prompts are written against.

use std::sync::OnceLock;

use regex::Regex;

/// A structural unit of extracted text.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(String),
    Paragraph(String),
    ListItem(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StructureStats {
    pub headings: usize,
    pub paragraphs: usize,
    pub list_items: usize,
}

impl StructureStats {
    /// True when nothing beyond plain paragraphs was recovered.
    pub fn is_flat(&self) -> bool {
        self.headings == 0 && self.list_items == 0
    }
}

const BULLET_PREFIXES: &[&str] = &["•", "▪", "●", "◦", "‣", "–", "-", "*"];
const MAX_HEADING_CHARS: usize = 60;
const MAX_TITLE_CASE_WORDS: usize = 4;

fn numbered_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,2}[.)]\s+").expect("static regex"))
}

/// Classifies raw line-oriented text (as produced by PDF text extraction) into blocks.
///
/// Blank lines separate paragraphs. Bulleted or numbered lines become list items.
/// Short all-caps lines, short lines ending in `:` and isolated title-case lines
/// become headings. Everything else is folded into the surrounding paragraph.
pub fn classify_lines(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    let flush = |paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::Paragraph(paragraph.join(" ")));
            paragraph.clear();
        }
    };

    for (i, line) in lines.iter().enumerate() {
        if line.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }

        if let Some(item) = strip_list_marker(line) {
            flush(&mut paragraph, &mut blocks);
            if !item.is_empty() {
                blocks.push(Block::ListItem(item.to_string()));
            }
            continue;
        }

        let isolated = lines.get(i.wrapping_sub(1)).map_or(true, |l| l.is_empty())
            && lines.get(i + 1).map_or(true, |l| l.is_empty());

        if looks_like_heading(line, isolated) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading(
                line.trim_end_matches(':').trim().to_string(),
            ));
            continue;
        }

        paragraph.push(line);
    }
    flush(&mut paragraph, &mut blocks);

    blocks
}

fn strip_list_marker(line: &str) -> Option<&str> {
    for prefix in BULLET_PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            // "-" and "*" only count as bullets when followed by whitespace
            if rest.starts_with(char::is_whitespace) || !matches!(*prefix, "-" | "*") {
                return Some(rest.trim());
            }
        }
    }
    numbered_item_re()
        .find(line)
        .map(|m| line[m.end()..].trim())
}

fn looks_like_heading(line: &str, isolated: bool) -> bool {
    let char_count = line.chars().count();
    if char_count > MAX_HEADING_CHARS || line.ends_with('.') {
        return false;
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 {
        return false;
    }

    let all_caps = letters.iter().all(|c| c.is_uppercase());
    let colon_label = line.ends_with(':') && char_count <= 40;

    let words: Vec<&str> = line.split_whitespace().collect();
    let title_case = isolated
        && words.len() <= MAX_TITLE_CASE_WORDS
        && words
            .iter()
            .all(|w| w.chars().next().is_some_and(|c| c.is_uppercase() || !c.is_alphabetic()));

    all_caps || colon_label || title_case
}

/// Renders blocks as markdown and reports what was recovered.
pub fn render(blocks: &[Block]) -> (String, StructureStats) {
    let mut out = String::new();
    let mut stats = StructureStats::default();
    let mut previous_was_item = false;

    for block in blocks {
        let is_item = matches!(block, Block::ListItem(_));
        if !out.is_empty() {
            out.push_str(if is_item && previous_was_item { "\n" } else { "\n\n" });
        }
        match block {
            Block::Heading(text) => {
                stats.headings += 1;
                out.push_str("## ");
                out.push_str(text);
            }
            Block::Paragraph(text) => {
                stats.paragraphs += 1;
                out.push_str(text);
            }
            Block::ListItem(text) => {
                stats.list_items += 1;
                out.push_str("- ");
                out.push_str(text);
            }
        }
        previous_was_item = is_item;
    }

    (out, stats)
}
