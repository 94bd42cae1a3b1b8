use crate::types::{CubeError, CubeResult};
use std::io::Read;

/// FITS block size; headers and data segments are padded to a multiple of this.
pub const BLOCK_SIZE: usize = 2880;
/// Size of one header card.
pub const CARD_SIZE: usize = 80;
/// Cards per block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;
/// Cards reserved when writing a primary header (4 blocks). Keeping slack
/// here lets the beam pass rewrite the header in place without shifting the
/// data segment.
pub const RESERVED_CARDS: usize = 4 * CARDS_PER_BLOCK;

/// Typed value of a header card.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    /// Value indicator present but no value given.
    Undefined,
}

/// One 80-byte header card.
#[derive(Debug, Clone, PartialEq)]
pub enum Card {
    Value {
        keyword: String,
        value: Value,
        comment: Option<String>,
    },
    /// COMMENT, HISTORY, or blank-keyword commentary.
    Commentary { keyword: String, text: String },
}

impl Card {
    pub fn keyword(&self) -> &str {
        match self {
            Card::Value { keyword, .. } => keyword,
            Card::Commentary { keyword, .. } => keyword,
        }
    }

    fn to_bytes(&self) -> [u8; CARD_SIZE] {
        let text = match self {
            Card::Value {
                keyword,
                value,
                comment,
            } => {
                let field = match value {
                    Value::Logical(true) => format!("{:>20}", "T"),
                    Value::Logical(false) => format!("{:>20}", "F"),
                    Value::Integer(v) => format!("{:>20}", v),
                    Value::Real(v) => format!("{:>20}", format_real(*v)),
                    Value::Text(s) => format!("'{:<8}'", s.replace('\'', "''")),
                    Value::Undefined => String::new(),
                };
                match comment {
                    Some(c) => format!("{:<8}= {} / {}", keyword, field, c),
                    None => format!("{:<8}= {}", keyword, field),
                }
            }
            Card::Commentary { keyword, text } => format!("{:<8}{}", keyword, text),
        };
        let mut raw = [b' '; CARD_SIZE];
        for (slot, byte) in raw.iter_mut().zip(text.bytes()) {
            *slot = byte;
        }
        raw
    }
}

/// Shortest decimal form that still parses back as a real (never a bare
/// integer), falling back to exponent notation when the plain form would
/// overflow the value field.
fn format_real(v: f64) -> String {
    let s = format!("{}", v);
    let s = if s.contains('.') { s } else { format!("{s}.0") };
    if s.len() > 20 {
        format!("{:E}", v)
    } else {
        s
    }
}

/// Ordered FITS header: a list of cards terminated on disk by END.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self { cards: Vec::new() }
    }

    /// Parse a header from `reader`, consuming whole blocks until the END
    /// card. Returns the header and the number of bytes consumed (always a
    /// multiple of the block size); the data segment starts right after.
    pub fn from_reader<R: Read>(reader: &mut R) -> CubeResult<(Self, u64)> {
        let mut cards = Vec::new();
        let mut bytes_read = 0u64;
        let mut block = [0u8; BLOCK_SIZE];
        loop {
            reader.read_exact(&mut block).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    CubeError::InvalidFormat("header ended before END card".to_string())
                } else {
                    CubeError::Io(e)
                }
            })?;
            bytes_read += BLOCK_SIZE as u64;
            for raw in block.chunks_exact(CARD_SIZE) {
                if raw[..8].eq_ignore_ascii_case(b"END     ") {
                    return Ok((Self { cards }, bytes_read));
                }
                if let Some(card) = parse_card(raw)? {
                    cards.push(card);
                }
            }
        }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.find(keyword).is_some()
    }

    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.find(keyword).map(|i| match &self.cards[i] {
            Card::Value { value, .. } => value,
            // find() only matches value cards
            Card::Commentary { .. } => unreachable!(),
        })
    }

    pub fn get_i64(&self, keyword: &str) -> Option<i64> {
        match self.get(keyword)? {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        match self.get(keyword)? {
            Value::Integer(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        match self.get(keyword)? {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_logical(&self, keyword: &str) -> Option<bool> {
        match self.get(keyword)? {
            Value::Logical(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer keyword that must be present (NAXIS, BITPIX and friends).
    pub fn require_i64(&self, keyword: &str) -> CubeResult<i64> {
        self.get_i64(keyword).ok_or_else(|| {
            CubeError::InvalidFormat(format!("missing or non-integer {keyword} keyword"))
        })
    }

    /// Replace the first card with this keyword, or append a new one before
    /// END. An existing comment is kept unless a new one is supplied.
    pub fn set(&mut self, keyword: &str, value: Value, comment: Option<&str>) {
        if let Some(i) = self.find(keyword) {
            if let Card::Value {
                value: old,
                comment: old_comment,
                ..
            } = &mut self.cards[i]
            {
                *old = value;
                if let Some(c) = comment {
                    *old_comment = Some(c.to_string());
                }
            }
        } else {
            self.cards.push(Card::Value {
                keyword: keyword.to_string(),
                value,
                comment: comment.map(|c| c.to_string()),
            });
        }
    }

    pub fn set_i64(&mut self, keyword: &str, value: i64) {
        self.set(keyword, Value::Integer(value), None);
    }

    pub fn set_f64(&mut self, keyword: &str, value: f64) {
        self.set(keyword, Value::Real(value), None);
    }

    pub fn set_str(&mut self, keyword: &str, value: &str) {
        self.set(keyword, Value::Text(value.to_string()), None);
    }

    pub fn set_logical(&mut self, keyword: &str, value: bool) {
        self.set(keyword, Value::Logical(value), None);
    }

    /// Insert a value card directly after the first card with `anchor` as
    /// keyword, appending at the end if the anchor is absent. Needed for
    /// the NAXISn family, which the format requires to sit together.
    pub fn insert_after(&mut self, anchor: &str, keyword: &str, value: Value) {
        let card = Card::Value {
            keyword: keyword.to_string(),
            value,
            comment: None,
        };
        match self.cards.iter().position(|c| c.keyword() == anchor) {
            Some(i) => self.cards.insert(i + 1, card),
            None => self.cards.push(card),
        }
    }

    /// Remove the first card with this keyword. Returns whether one existed.
    pub fn remove(&mut self, keyword: &str) -> bool {
        match self.find(keyword) {
            Some(i) => {
                self.cards.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn push_comment(&mut self, text: &str) {
        self.cards.push(Card::Commentary {
            keyword: "COMMENT".to_string(),
            text: text.to_string(),
        });
    }

    /// Serialize to disk form: all cards, END, then space padding out to a
    /// whole number of blocks, at least `min_cards` cards worth.
    pub fn to_bytes(&self, min_cards: usize) -> Vec<u8> {
        let n_cards = (self.cards.len() + 1).max(min_cards);
        let n_blocks = n_cards.div_ceil(CARDS_PER_BLOCK);
        let mut out = Vec::with_capacity(n_blocks * BLOCK_SIZE);
        for card in &self.cards {
            out.extend_from_slice(&card.to_bytes());
        }
        let mut end = [b' '; CARD_SIZE];
        end[..3].copy_from_slice(b"END");
        out.extend_from_slice(&end);
        out.resize(n_blocks * BLOCK_SIZE, b' ');
        out
    }

    fn find(&self, keyword: &str) -> Option<usize> {
        self.cards.iter().position(
            |c| matches!(c, Card::Value { keyword: k, .. } if k.eq_ignore_ascii_case(keyword)),
        )
    }
}

fn parse_card(raw: &[u8]) -> CubeResult<Option<Card>> {
    if !raw.is_ascii() {
        return Err(CubeError::InvalidFormat(
            "non-ASCII bytes in header card".to_string(),
        ));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| CubeError::InvalidFormat("non-ASCII bytes in header card".to_string()))?;
    let keyword = text[..8].trim_end();
    let rest = &text[8..];

    if keyword.is_empty() && rest.trim().is_empty() {
        // Padding card
        return Ok(None);
    }
    if keyword == "COMMENT" || keyword == "HISTORY" || keyword.is_empty() {
        return Ok(Some(Card::Commentary {
            keyword: keyword.to_string(),
            text: rest.trim_end().to_string(),
        }));
    }
    if !rest.starts_with("= ") {
        // Keyword without a value indicator; the standard allows these and
        // treats the remainder as commentary.
        return Ok(Some(Card::Commentary {
            keyword: keyword.to_string(),
            text: rest.trim_end().to_string(),
        }));
    }

    let field = &rest[2..];
    let (value, comment) = parse_value_field(field, keyword)?;
    Ok(Some(Card::Value {
        keyword: keyword.to_string(),
        value,
        comment,
    }))
}

fn parse_value_field(field: &str, keyword: &str) -> CubeResult<(Value, Option<String>)> {
    let trimmed = field.trim_start();
    if let Some(quoted) = trimmed.strip_prefix('\'') {
        // Quoted string; doubled quotes are escapes.
        let mut value = String::new();
        let mut chars = quoted.chars().peekable();
        let mut terminated = false;
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    terminated = true;
                    break;
                }
            } else {
                value.push(c);
            }
        }
        if !terminated {
            return Err(CubeError::InvalidFormat(format!(
                "unterminated string in {keyword} card"
            )));
        }
        let tail: String = chars.collect();
        let comment = tail
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return Ok((Value::Text(value.trim_end().to_string()), comment));
    }

    let (token, comment) = match trimmed.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (trimmed.trim(), None),
    };
    let value = if token.is_empty() {
        Value::Undefined
    } else if token == "T" {
        Value::Logical(true)
    } else if token == "F" {
        Value::Logical(false)
    } else if let Ok(v) = token.parse::<i64>() {
        Value::Integer(v)
    } else if let Ok(v) = token.replace(['D', 'd'], "E").parse::<f64>() {
        Value::Real(v)
    } else {
        return Err(CubeError::InvalidFormat(format!(
            "cannot parse value '{token}' in {keyword} card"
        )));
    };
    Ok((value, comment))
}
