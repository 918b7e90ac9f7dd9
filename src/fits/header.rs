// src/fits/header.rs

//! FITS header cards, and moving them in and out of a cfitsio handle.

use std::ffi::{CStr, CString, c_char, c_int};
use std::fmt;

use fitsio::FitsFile;
use fitsio::errors::check_status as fits_check_status;

use crate::errors::{PrepipeError, Result};

/// Header card size.
pub const CARD_LEN: usize = 80;

/// Keywords that describe the data layout of an HDU rather than its content.
pub const STRUCTURAL_KEYS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "EXTEND", "XTENSION", "PCOUNT", "GCOUNT", "END",
];

/// One 80-character header record.
#[derive(Clone, PartialEq, Eq)]
pub struct Card {
    image: String,
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Card({:?})", self.image.trim_end())
    }
}

impl Card {
    /// Wrap a raw card image, padding or truncating to 80 characters.
    pub fn from_image(image: &str) -> Self {
        let mut image: String = image
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { ' ' })
            .take(CARD_LEN)
            .collect();
        while image.len() < CARD_LEN {
            image.push(' ');
        }
        Self { image }
    }

    pub fn logical(key: &str, value: bool) -> Self {
        Self::from_image(&format!("{:<8}= {:>20}", key, if value { "T" } else { "F" }))
    }

    pub fn integer(key: &str, value: i64) -> Self {
        Self::from_image(&format!("{:<8}= {:>20}", key, value))
    }

    pub fn string(key: &str, value: &str) -> Self {
        let quoted = format!("'{:<8}'", value.replace('\'', "''"));
        Self::from_image(&format!("{:<8}= {:<20}", key, quoted))
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Keyword, trimmed (`""` for blank cards).
    pub fn keyword(&self) -> &str {
        self.image[..8].trim_end()
    }

    pub fn is_commentary(&self) -> bool {
        matches!(self.keyword(), "COMMENT" | "HISTORY" | "")
    }

    pub fn is_structural(&self) -> bool {
        let key = self.keyword();
        STRUCTURAL_KEYS.contains(&key)
            || key
                .strip_prefix("NAXIS")
                .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
    }

    /// Raw value field, without the comment; `None` if this card has no
    /// value indicator.
    fn value_field(&self) -> Option<&str> {
        if &self.image[8..10] != "= " {
            return None;
        }
        Some(&self.image[10..])
    }

    /// String value with quotes removed and `''` unescaped.
    pub fn value_str(&self) -> Option<String> {
        let field = self.value_field()?.trim_start();
        if let Some(rest) = field.strip_prefix('\'') {
            let mut out = String::new();
            let mut chars = rest.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        out.push('\'');
                    } else {
                        return Some(out.trim_end().to_string());
                    }
                } else {
                    out.push(c);
                }
            }
            Some(out.trim_end().to_string())
        } else {
            let v = field.split('/').next().unwrap_or("").trim();
            (!v.is_empty()).then(|| v.to_string())
        }
    }

    pub fn value_int(&self) -> Option<i64> {
        self.value_str()?.parse().ok()
    }
}

/// Ordered header cards of one HDU, `END` excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cards(cards: Vec<Card>) -> Self {
        Self { cards }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn get(&self, key: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.keyword() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)?.value_str()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.value_int()
    }

    /// Cards of the current HDU of `fptr`, `END` excluded.
    pub fn read_current(fptr: &mut FitsFile) -> Result<Self> {
        let mut status = 0;
        let mut nkeys: c_int = 0;
        let mut morekeys: c_int = 0;
        unsafe {
            // ffghsp = fits_get_hdrspace
            fitsio_sys::ffghsp(fptr.as_raw(), &mut nkeys, &mut morekeys, &mut status);
            fits_check_status(status)?;
        }

        let mut cards = Vec::with_capacity(nkeys.max(0) as usize);
        let mut buf = [0 as c_char; CARD_LEN + 1];
        for n in 1..=nkeys {
            let image = unsafe {
                // ffgrec = fits_read_record
                fitsio_sys::ffgrec(fptr.as_raw(), n, buf.as_mut_ptr(), &mut status);
                fits_check_status(status)?;
                CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
            };
            cards.push(Card::from_image(&image));
        }
        Ok(Self { cards })
    }

    /// Append every non-structural card to the current HDU of `fptr`.
    /// The layout keys are cfitsio's to write when the HDU is created.
    pub fn write_content(&self, fptr: &mut FitsFile) -> Result<()> {
        let mut status = 0;
        for card in self.cards.iter().filter(|c| !c.is_structural()) {
            let record = CString::new(card.image())
                .map_err(|e| PrepipeError::Fits(format!("bad card {card:?}: {e}")))?;
            unsafe {
                // ffprec = fits_write_record
                fitsio_sys::ffprec(fptr.as_raw(), record.as_ptr(), &mut status);
                fits_check_status(status)?;
            }
        }
        Ok(())
    }
}

/// Header for a standalone file built from an extension and its primary.
///
/// Extension keys win. Primary keys are appended only when the extension
/// lacks them, and never for commentary or structural keys. `XTENSION`
/// becomes `SIMPLE = T`; `PCOUNT` and `GCOUNT` are dropped.
pub fn merge_headers(primary: &Header, extension: &Header) -> Header {
    let mut merged = Header::new();
    merged.push(Card::logical("SIMPLE", true));

    for card in extension.cards() {
        match card.keyword() {
            "XTENSION" | "SIMPLE" | "PCOUNT" | "GCOUNT" | "EXTEND" => {}
            _ => merged.push(card.clone()),
        }
    }

    for card in primary.cards() {
        if card.is_commentary() || card.is_structural() {
            continue;
        }
        if extension.contains(card.keyword()) {
            continue;
        }
        merged.push(card.clone());
    }

    merged
}
