//! BB-code to GitHub-flavoured Markdown conversion.
//!
//! The passes run in a fixed order and later passes rely on the earlier ones:
//! code is lifted out first so nothing touches it, quotes are resolved from
//! the innermost level outwards, inline formatting and the tag table follow,
//! and only then are leftover tags stripped. `[ATTACH]` tokens survive every
//! pass so the attachment linker can rewrite them afterwards.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Number of quote-resolution passes; each pass peels one nesting level.
pub const DEFAULT_MAX_QUOTE_PASSES: usize = 10;

const PROTECT_OPEN: char = '\u{E000}';
const PROTECT_CLOSE: char = '\u{E001}';

lazy_static! {
    static ref CODE_BLOCK: Regex = Regex::new(
        r#"(?is)\[code(?:=["']?([a-z0-9_+#.-]*)["']?)?\](.*?)\[/code\]"#
    ).unwrap();
    static ref INLINE_CODE: Regex = Regex::new(r"(?is)\[icode\](.*?)\[/icode\]").unwrap();
    static ref PROTECTED_SLOT: Regex = Regex::new("\u{E000}(\\d+)\u{E001}").unwrap();

    static ref QUOTE_TAG: Regex = Regex::new(r"(?i)\[quote(?:=([^\]]*))?\]|\[/quote\]").unwrap();

    static ref BOLD: Regex = Regex::new(r"(?is)\[b\](.*?)\[/b\]").unwrap();
    static ref ITALIC: Regex = Regex::new(r"(?is)\[i\](.*?)\[/i\]").unwrap();
    static ref UNDERLINE: Regex = Regex::new(r"(?is)\[u\](.*?)\[/u\]").unwrap();
    static ref STRIKE: Regex = Regex::new(r"(?is)\[(?:s|strike)\](.*?)\[/(?:s|strike)\]").unwrap();

    static ref URL_WITH_TARGET: Regex = Regex::new(
        r#"(?is)\[url=(?:"([^"]*)"|'([^']*)'|([^\]]*))\](.*?)\[/url\]"#
    ).unwrap();
    static ref URL_BARE: Regex = Regex::new(r"(?is)\[url\](.*?)\[/url\]").unwrap();
    static ref EMAIL: Regex = Regex::new(r"(?is)\[email(?:=([^\]]+))?\](.*?)\[/email\]").unwrap();
    static ref IMAGE: Regex = Regex::new(r"(?is)\[img(?:\s[^\]]*|=[^\]]*)?\](.*?)\[/img\]").unwrap();
    static ref SPOILER: Regex = Regex::new(
        r#"(?is)\[spoiler(?:=(?:"([^"]*)"|([^\]]*)))?\](.*?)\[/spoiler\]"#
    ).unwrap();
    static ref INLINE_SPOILER: Regex = Regex::new(r"(?is)\[ispoiler\](.*?)\[/ispoiler\]").unwrap();
    static ref MEDIA: Regex = Regex::new(r"(?is)\[media=([^\]]+)\](.*?)\[/media\]").unwrap();
    static ref USER: Regex = Regex::new(r"(?is)\[user=\d+\](.*?)\[/user\]").unwrap();
    static ref LIST_ITEM: Regex = Regex::new(r"\[\*\]").unwrap();
    static ref LIST_OPEN: Regex = Regex::new(r"(?i)\[list(?:=[^\]]*)?\]\n").unwrap();
    static ref LIST_CLOSE: Regex = Regex::new(r"(?i)\n\[/list\]").unwrap();
    static ref CENTER: Regex = Regex::new(r"(?is)\[center\](.*?)\[/center\]").unwrap();
    static ref ALIGNMENT: Regex = Regex::new(
        r"(?is)\[(?:left|right|justify|indent)(?:=[^\]]*)?\](.*?)\[/(?:left|right|justify|indent)\]"
    ).unwrap();
    static ref COSMETIC: Regex = Regex::new(
        r"(?is)\[(?:color|size|font)=[^\]]+\](.*?)\[/(?:color|size|font)\]"
    ).unwrap();
    static ref RULE: Regex = Regex::new(r"(?i)\[hr\]").unwrap();

    static ref LEFTOVER_TAG: Regex = Regex::new(r"\[/?[a-zA-Z][a-zA-Z0-9=_-]*\]").unwrap();
    static ref BLANK_RUN: Regex = Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap();
}

#[derive(Debug, Clone)]
pub struct ContentConverter {
    max_quote_passes: usize,
}

impl ContentConverter {
    pub fn new() -> Self {
        Self::with_max_quote_passes(DEFAULT_MAX_QUOTE_PASSES)
    }

    /// Quotes nested deeper than `max_quote_passes` are left partially
    /// converted; the leftover tags are stripped by the cleanup pass.
    pub fn with_max_quote_passes(max_quote_passes: usize) -> Self {
        Self {
            max_quote_passes: max_quote_passes.max(1),
        }
    }

    pub fn max_quote_passes(&self) -> usize {
        self.max_quote_passes
    }

    pub fn convert(&self, markup: &str) -> String {
        if markup.trim().is_empty() {
            return String::new();
        }

        let normalized = markup
            .replace("\r\n", "\n")
            .replace([PROTECT_OPEN, PROTECT_CLOSE], "");

        let mut vault = ProtectedRegions::default();
        let text = vault.lift_code(&normalized);
        let text = self.rewrite_quotes(&text);
        let text = rewrite_inline_formatting(&text);
        let text = apply_tag_table(&text);
        let text = strip_leftover_tags(&text);
        let text = BLANK_RUN.replace_all(&text, "\n\n");
        let text = vault.restore(&text);

        text.trim_matches([' ', '\t']).to_string()
    }

    fn rewrite_quotes(&self, input: &str) -> String {
        let mut current = input.to_string();
        for _ in 0..self.max_quote_passes {
            let next = rewrite_innermost_quotes(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

impl Default for ContentConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Code bodies parked outside the text while the other passes run.
#[derive(Default)]
struct ProtectedRegions {
    slots: Vec<String>,
}

impl ProtectedRegions {
    fn park(&mut self, content: String) -> String {
        self.slots.push(content);
        format!("{PROTECT_OPEN}{}{PROTECT_CLOSE}", self.slots.len() - 1)
    }

    fn lift_code(&mut self, input: &str) -> String {
        let blocks = CODE_BLOCK.replace_all(input, |caps: &Captures| {
            let language = caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let body = trim_blank_lines(caps.get(2).map_or("", |m| m.as_str()));
            let slot = self.park(body.to_string());
            format!("\n```{language}\n{slot}\n```\n")
        });
        INLINE_CODE
            .replace_all(&blocks, |caps: &Captures| {
                let body = caps.get(1).map_or("", |m| m.as_str());
                if body.trim().is_empty() {
                    String::new()
                } else {
                    let slot = self.park(body.to_string());
                    format!("`{slot}`")
                }
            })
            .into_owned()
    }

    /// Puts parked code back. A slot that sits after a `> ` prefix gets that
    /// prefix on each of its continuation lines so the code stays quoted.
    fn restore(&self, input: &str) -> String {
        PROTECTED_SLOT
            .replace_all(input, |caps: &Captures| {
                let body = caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| self.slots.get(index))
                    .map_or("", String::as_str);
                let start = caps.get(0).map_or(0, |m| m.start());
                let line_start = input[..start].rfind('\n').map_or(0, |i| i + 1);
                let prefix = &input[line_start..start];
                if prefix.is_empty() || !prefix.chars().all(|c| c == '>' || c == ' ') {
                    return body.to_string();
                }
                body.split('\n')
                    .enumerate()
                    .map(|(i, line)| match (i, line.is_empty()) {
                        (0, _) => line.to_string(),
                        (_, true) => prefix.trim_end().to_string(),
                        _ => format!("{prefix}{line}"),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .into_owned()
    }
}

/// True for a fence line, including one nested in `>` quote prefixes.
pub(crate) fn is_code_fence(line: &str) -> bool {
    line.trim_start_matches(|c: char| c == '>' || c.is_whitespace())
        .starts_with("```")
}

/// Drops whitespace-only lines around a code body and trailing whitespace,
/// keeping the indentation of the first real line.
fn trim_blank_lines(body: &str) -> &str {
    let body = body.trim_end();
    let mut start = 0;
    for line in body.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    &body[start..]
}

/// Rewrites every quote whose body holds no further opening quote tag.
fn rewrite_innermost_quotes(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;
    let mut open: Option<(usize, usize, Option<String>)> = None;

    for caps in QUOTE_TAG.captures_iter(input) {
        let Some(tag) = caps.get(0) else { continue };
        if tag.as_str().starts_with("[/") {
            if let Some((start, body_start, author)) = open.take() {
                output.push_str(&input[cursor..start]);
                output.truncate(output.trim_end_matches([' ', '\t']).len());
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&render_blockquote(
                    author.as_deref(),
                    &input[body_start..tag.start()],
                ));
                cursor = tag.end();
            }
        } else {
            let author = caps.get(1).and_then(|m| parse_attribution(m.as_str()));
            open = Some((tag.start(), tag.end(), author));
        }
    }

    output.push_str(&input[cursor..]);
    output
}

/// `[quote="Name, post: 12, member: 3"]` carries the author first.
fn parse_attribution(raw: &str) -> Option<String> {
    let unquoted = raw.trim().trim_matches(['"', '\'']);
    let author = unquoted.split(',').next().unwrap_or("").trim();
    if author.is_empty() {
        None
    } else {
        Some(author.to_string())
    }
}

fn render_blockquote(author: Option<&str>, body: &str) -> String {
    let mut quoted = String::new();
    if let Some(author) = author {
        quoted.push_str(&format!("> **{author} said:**\n"));
    }
    for line in body.trim().split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            quoted.push_str(">\n");
        } else {
            quoted.push_str("> ");
            quoted.push_str(line);
            quoted.push('\n');
        }
    }
    quoted
}

fn rewrite_inline_formatting(input: &str) -> String {
    let text = wrap_unless_blank(&BOLD, input, "**", "**");
    let text = wrap_unless_blank(&ITALIC, &text, "*", "*");
    let text = wrap_unless_blank(&UNDERLINE, &text, "<u>", "</u>");
    wrap_unless_blank(&STRIKE, &text, "~~", "~~")
}

/// A tag pair around nothing but whitespace disappears entirely.
fn wrap_unless_blank(pattern: &Regex, input: &str, open: &str, close: &str) -> String {
    pattern
        .replace_all(input, |caps: &Captures| {
            let inner = caps.get(1).map_or("", |m| m.as_str());
            if inner.trim().is_empty() {
                String::new()
            } else {
                format!("{open}{inner}{close}")
            }
        })
        .into_owned()
}

fn apply_tag_table(input: &str) -> String {
    let text = URL_WITH_TARGET.replace_all(input, |caps: &Captures| {
        let target = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str())
            .trim();
        let label = caps.get(4).map_or("", |m| m.as_str()).trim();
        let label = if label.is_empty() { target } else { label };
        format!("[{label}]({target})")
    });
    let text = URL_BARE.replace_all(&text, |caps: &Captures| {
        let target = caps[1].trim();
        format!("[{target}]({target})")
    });
    let text = EMAIL.replace_all(&text, |caps: &Captures| {
        let label = caps[2].trim();
        let address = caps.get(1).map_or(label, |m| m.as_str().trim());
        format!("[{label}](mailto:{address})")
    });
    let text = IMAGE.replace_all(&text, |caps: &Captures| format!("![]({})", caps[1].trim()));
    let text = SPOILER.replace_all(&text, |caps: &Captures| {
        let title = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim())
            .filter(|t| !t.is_empty())
            .unwrap_or("Spoiler");
        let body = caps.get(3).map_or("", |m| m.as_str());
        format!("<details><summary>{title}</summary>\n\n{body}\n\n</details>")
    });
    let text = INLINE_SPOILER.replace_all(&text, "||${1}||");
    let text = MEDIA.replace_all(&text, |caps: &Captures| {
        let provider = caps[1].trim().trim_matches('"');
        let media_id = caps[2].trim();
        format!("[{provider}]({})", media_url(provider, media_id))
    });
    let text = USER.replace_all(&text, |caps: &Captures| {
        let name = caps[1].trim();
        if name.is_empty() {
            String::new()
        } else {
            format!("**{name}**")
        }
    });
    let text = LIST_ITEM.replace_all(&text, "- ");
    let text = LIST_OPEN.replace_all(&text, "\n");
    let text = LIST_CLOSE.replace_all(&text, "\n");
    let text = CENTER.replace_all(&text, "<center>${1}</center>");
    let text = ALIGNMENT.replace_all(&text, "${1}");
    let text = COSMETIC.replace_all(&text, "${1}");
    RULE.replace_all(&text, "\n---\n").into_owned()
}

fn media_url(provider: &str, media_id: &str) -> String {
    match provider.to_ascii_lowercase().as_str() {
        "youtube" => format!("https://www.youtube.com/watch?v={media_id}"),
        "vimeo" => format!("https://vimeo.com/{media_id}"),
        _ => media_id.to_string(),
    }
}

/// Strips unknown tags but keeps attachment tokens and the `[text]` half of
/// Markdown links produced by the earlier passes.
fn strip_leftover_tags(input: &str) -> String {
    LEFTOVER_TAG
        .replace_all(input, |caps: &Captures| {
            let Some(tag) = caps.get(0) else {
                return String::new();
            };
            let token = tag.as_str();
            let upper = token.to_ascii_uppercase();
            let is_attachment = upper.starts_with("[ATTACH") || upper == "[/ATTACH]";
            let starts_link = input[tag.end()..].starts_with('(');
            if is_attachment || starts_link {
                token.to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}
