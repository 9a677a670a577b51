// Value normalizer: transport-mangling cleanup for text, locale-aware count parsing.
// Pure and synchronous. Errors are value-level: the reconciler turns them into
// an unavailable field, never into a failed record.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use engage_common::{Comment, Field, PlausibilityCeilings, RawComment, RawValue};

pub const MAX_BODY_CHARS: usize = 2000;
pub const MAX_COMMENT_CHARS: usize = 200;

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static IMG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static ALT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\balt\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)</?[a-zA-Z][^<>]*>").unwrap());
static INLINE_WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{00A0}\u{3000}]+").unwrap());
static BLANK_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedValue {
    Text(String),
    Count(u64),
    Comments(Vec<Comment>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    #[error("empty value")]
    Empty,

    #[error("unparseable count: {0:?}")]
    Unparseable(String),

    #[error("negative count: {0}")]
    Negative(String),

    #[error("count {0} is a saturated 32-bit value")]
    Saturated(i64),

    #[error("count does not fit in 64 bits: {0}")]
    Overflow(String),

    #[error("{value} exceeds the {field} ceiling of {ceiling}")]
    AboveCeiling { field: Field, value: u64, ceiling: u64 },

    #[error("{field} cannot hold this kind of value")]
    WrongKind { field: Field },
}

/// Normalizes raw candidate values for one platform's ceilings.
#[derive(Debug, Clone)]
pub struct Normalizer {
    ceilings: PlausibilityCeilings,
    max_comments: usize,
}

impl Normalizer {
    pub fn new(ceilings: PlausibilityCeilings, max_comments: usize) -> Self {
        Self {
            ceilings,
            max_comments,
        }
    }

    pub fn normalize(
        &self,
        field: Field,
        raw: &RawValue,
    ) -> Result<NormalizedValue, NormalizationError> {
        match field {
            Field::LikeCount | Field::CommentCount | Field::ShareCount | Field::ViewCount => {
                let value = count_from_raw(field, raw)?;
                if let Some(ceiling) = self.ceilings.for_field(field) {
                    if value > ceiling {
                        return Err(NormalizationError::AboveCeiling {
                            field,
                            value,
                            ceiling,
                        });
                    }
                }
                Ok(NormalizedValue::Count(value))
            }
            Field::Author | Field::Thumbnail | Field::Body => {
                let text = match raw {
                    RawValue::Text(s) | RawValue::Count(s) => normalize_text(s),
                    RawValue::Integer(n) => n.to_string(),
                    RawValue::Comments(_) => return Err(NormalizationError::WrongKind { field }),
                };
                let text = match field {
                    Field::Body => truncate_chars(&text, MAX_BODY_CHARS),
                    Field::Author => single_line(&text),
                    _ => text,
                };
                if text.is_empty() {
                    return Err(NormalizationError::Empty);
                }
                Ok(NormalizedValue::Text(text))
            }
            Field::CommentList => match raw {
                RawValue::Comments(comments) => Ok(NormalizedValue::Comments(
                    comments
                        .iter()
                        .filter_map(normalize_comment)
                        .take(self.max_comments)
                        .collect(),
                )),
                _ => Err(NormalizationError::WrongKind { field }),
            },
        }
    }
}

fn count_from_raw(field: Field, raw: &RawValue) -> Result<u64, NormalizationError> {
    match raw {
        RawValue::Integer(n) => integer_count(*n),
        RawValue::Count(s) | RawValue::Text(s) => parse_count(s),
        RawValue::Comments(_) => Err(NormalizationError::WrongKind { field }),
    }
}

/// JSON integers arrive signed. Negatives and exact 32-bit maxima are the
/// signature of a value that was squeezed through a 32-bit field somewhere upstream.
fn integer_count(n: i64) -> Result<u64, NormalizationError> {
    if n < 0 {
        return Err(NormalizationError::Negative(n.to_string()));
    }
    if n == i64::from(i32::MAX) || n == i64::from(u32::MAX) {
        return Err(NormalizationError::Saturated(n));
    }
    Ok(n as u64)
}

fn normalize_comment(raw: &RawComment) -> Option<Comment> {
    let text = truncate_chars(&normalize_text(&raw.text), MAX_COMMENT_CHARS);
    if text.is_empty() {
        return None;
    }
    let author = single_line(&normalize_text(&raw.author));
    let likes = raw
        .likes
        .as_ref()
        .and_then(|l| count_from_raw(Field::LikeCount, l).ok());
    Some(Comment {
        author,
        text,
        likes,
    })
}

/// Parse a displayed count such as `"3,400"`, `"1.1만"`, `"2.5K"` or `"3억"`
/// into an exact integer. No floating point is involved.
pub fn parse_count(input: &str) -> Result<u64, NormalizationError> {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{00A0}' | '_'))
        .collect();
    let cleaned = cleaned.trim_end_matches('+');
    if cleaned.is_empty() {
        return Err(NormalizationError::Empty);
    }
    if cleaned.starts_with('-') {
        return Err(NormalizationError::Negative(input.trim().to_string()));
    }

    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, suffix) = cleaned.split_at(split);
    let multiplier: u128 = match suffix.trim() {
        "" => 1,
        "k" | "K" | "천" | "千" => 1_000,
        "w" | "W" | "만" | "万" | "萬" => 10_000,
        "m" | "M" => 1_000_000,
        "억" | "亿" | "億" => 100_000_000,
        "b" | "B" => 1_000_000_000,
        _ => return Err(NormalizationError::Unparseable(input.to_string())),
    };

    let mut parts = number.split('.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    if parts.next().is_some() || (whole.is_empty() && fraction.is_empty()) {
        return Err(NormalizationError::Unparseable(input.to_string()));
    }
    if multiplier == 1 && fraction.chars().any(|c| c != '0') {
        return Err(NormalizationError::Unparseable(input.to_string()));
    }
    if whole.len() > 30 || fraction.len() > 18 {
        return Err(NormalizationError::Overflow(input.to_string()));
    }

    let overflow = || NormalizationError::Overflow(input.to_string());
    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut value = whole_value.checked_mul(multiplier).ok_or_else(overflow)?;
    if !fraction.is_empty() {
        let scale = 10u128.pow(fraction.len() as u32);
        let fraction_value: u128 = fraction.parse().map_err(|_| overflow())?;
        let scaled = fraction_value.checked_mul(multiplier).ok_or_else(overflow)? / scale;
        value = value.checked_add(scaled).ok_or_else(overflow)?;
    }

    u64::try_from(value).map_err(|_| overflow())
}

/// Clean text from a scraped payload. Idempotent: the pipeline runs until its
/// output stops changing, however deeply entities are nested.
pub fn normalize_text(input: &str) -> String {
    let mut current = clean_once(input);
    // A pass that changes the text consumes an entity, escape or tag of the
    // input, so the input length bounds the number of productive passes.
    for _ in 0..=input.len() {
        let next = clean_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn clean_once(input: &str) -> String {
    let text = if input.contains("\\u") {
        decode_escapes(input)
    } else {
        input.to_string()
    };
    let text = decode_entities(&text);
    let text = strip_markup(&text);
    tidy_whitespace(&text)
}

/// Decode `\uXXXX` (including surrogate pairs) and the basic JSON escapes.
/// Sequences that do not decode are kept verbatim.
fn decode_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('u') => {
                chars.next();
                let hex: String = chars.clone().take(4).collect();
                match u16::from_str_radix(&hex, 16).ok().filter(|_| hex.len() == 4) {
                    Some(unit) => {
                        for _ in 0..4 {
                            chars.next();
                        }
                        match decode_unit(unit, &mut chars) {
                            Some(ch) => out.push(ch),
                            None => {
                                out.push_str("\\u");
                                out.push_str(&hex);
                            }
                        }
                    }
                    None => out.push_str("\\u"),
                }
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('r') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some(esc @ ('"' | '/' | '\\' | '\'')) => {
                chars.next();
                out.push(esc);
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Resolve one UTF-16 unit, consuming a trailing low surrogate when needed.
fn decode_unit(
    unit: u16,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Option<char> {
    if !(0xD800..0xDC00).contains(&unit) {
        return char::from_u32(u32::from(unit));
    }
    let lookahead: String = chars.clone().take(6).collect();
    let low = lookahead
        .strip_prefix("\\u")
        .and_then(|h| u16::from_str_radix(h, 16).ok())
        .filter(|l| (0xDC00..0xE000).contains(l))?;
    for _ in 0..6 {
        chars.next();
    }
    let code = 0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
    char::from_u32(code)
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    ENTITY_RE
        .replace_all(input, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "hellip" => Some('…'),
                    "middot" => Some('·'),
                    _ => None,
                }
            };
            match decoded {
                Some(ch) => ch.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn strip_markup(input: &str) -> String {
    if !input.contains('<') {
        return input.to_string();
    }
    let text = COMMENT_RE.replace_all(input, "");
    let text = IMG_RE.replace_all(&text, |caps: &Captures| {
        let alt = ALT_RE
            .captures(&caps[0])
            .and_then(|a| a.get(1).or_else(|| a.get(2)))
            .map(|m| m.as_str().trim().replace(['[', ']'], ""))
            .filter(|a| !a.is_empty());
        match alt {
            Some(alt) => format!("[{alt}]"),
            None => "[image]".to_string(),
        }
    });
    let text = BR_RE.replace_all(&text, "\n");
    TAG_RE.replace_all(&text, "").into_owned()
}

fn tidy_whitespace(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| INLINE_WS_RE.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    BLANK_LINES_RE
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
