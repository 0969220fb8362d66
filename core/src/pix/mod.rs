//! PIX BR Code payloads.
//!
//! A BR Code is a flat run of TLV fields, `tag (2) + length (2) + value`,
//! closed by a `63` field holding a CRC16 of everything before it (including
//! the `6304` header itself). Lengths count bytes, not characters.
//!
//! | Tag  | Content                                                  |
//! |------|----------------------------------------------------------|
//! | `00` | payload format, always `01`                              |
//! | `26` | `00` = `BR.GOV.BCB.PIX`, `01` = key, `02` = txid (opt.)  |
//! | `52` | merchant category, `0000`                                |
//! | `53` | currency, `986` (BRL)                                    |
//! | `54` | amount, optional, `R.CC`                                 |
//! | `58` | country, `BR`                                            |
//! | `59` | merchant name, at most 25 bytes                          |
//! | `60` | merchant city, at most 15 bytes                          |
//! | `62` | `05` = txid, or empty                                    |
//! | `63` | CRC16, 4 upper-case hex digits                           |

mod crc;

pub use crc::{crc16, crc16_hex};

use crate::types::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Globally unique identifier of the PIX arrangement
pub const GUI: &str = "BR.GOV.BCB.PIX";

/// Longest merchant name, in bytes
pub const MAX_MERCHANT_NAME_BYTES: usize = 25;

/// Longest merchant city, in bytes
pub const MAX_MERCHANT_CITY_BYTES: usize = 15;

/// Longest value a two-digit length can describe
pub const MAX_FIELD_BYTES: usize = 99;

const CRC_HEADER: &str = "6304";

/// Encoding or decoding failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PixError {
    /// A value does not fit a two-digit length
    #[error("field {tag} is {len} bytes, the limit is {MAX_FIELD_BYTES}")]
    FieldTooLong {
        /// Field tag
        tag: &'static str,
        /// Value length in bytes
        len: usize,
    },

    /// A mandatory value is empty
    #[error("field {0} must not be empty")]
    EmptyField(&'static str),

    /// A mandatory field is absent from a decoded payload
    #[error("field {0} is missing")]
    MissingField(&'static str),

    /// The input is not a well-formed TLV run
    #[error("malformed payload at byte {offset}: {reason}")]
    Malformed {
        /// Byte offset of the problem
        offset: usize,
        /// What was wrong
        reason: &'static str,
    },

    /// The trailing checksum does not match the content
    #[error("checksum mismatch: computed {expected}, payload carries {found}")]
    ChecksumMismatch {
        /// Checksum recomputed over the payload
        expected: String,
        /// Checksum found in the `63` field
        found: String,
    },
}

/// Content of a static or dynamic PIX charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixPayload {
    /// Receiver's PIX key (e-mail, phone, CPF/CNPJ or random key)
    pub key: String,
    /// Receiver's name
    pub merchant_name: String,
    /// Receiver's city
    pub merchant_city: String,
    /// Fixed amount; the payer chooses when absent
    pub amount: Option<Money>,
    /// Transaction id reconciling the payment with the charge
    pub txid: Option<String>,
}

impl PixPayload {
    /// A payload without amount or txid
    #[must_use]
    pub fn new(key: impl Into<String>, merchant_name: impl Into<String>, merchant_city: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            merchant_name: merchant_name.into(),
            merchant_city: merchant_city.into(),
            amount: None,
            txid: None,
        }
    }

    /// Sets the amount
    #[must_use]
    pub const fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Sets the transaction id
    #[must_use]
    pub fn with_txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    /// Renders the BR Code string, checksum included.
    ///
    /// Merchant name and city are cut to their byte limits on a character
    /// boundary.
    ///
    /// # Errors
    ///
    /// [`PixError::EmptyField`] for an empty key or merchant name, and
    /// [`PixError::FieldTooLong`] when any value exceeds 99 bytes.
    pub fn encode(&self) -> Result<String, PixError> {
        if self.key.is_empty() {
            return Err(PixError::EmptyField("26.01"));
        }
        if self.merchant_name.trim().is_empty() {
            return Err(PixError::EmptyField("59"));
        }

        let txid = self.txid.as_deref().filter(|t| !t.is_empty());

        let mut account = tlv("26.00", GUI)?;
        account.push_str(&tlv("26.01", &self.key)?);
        if let Some(txid) = txid {
            account.push_str(&tlv("26.02", txid)?);
        }

        let additional = match txid {
            Some(txid) => tlv("62.05", txid)?,
            None => String::new(),
        };

        let mut payload = tlv("00", "01")?;
        payload.push_str(&tlv("26", &account)?);
        payload.push_str(&tlv("52", "0000")?);
        payload.push_str(&tlv("53", "986")?);
        if let Some(amount) = self.amount {
            payload.push_str(&tlv("54", &amount.to_decimal_string())?);
        }
        payload.push_str(&tlv("58", "BR")?);
        payload.push_str(&tlv(
            "59",
            truncate_to_bytes(&self.merchant_name, MAX_MERCHANT_NAME_BYTES),
        )?);
        payload.push_str(&tlv(
            "60",
            truncate_to_bytes(&self.merchant_city, MAX_MERCHANT_CITY_BYTES),
        )?);
        payload.push_str(&tlv("62", &additional)?);

        payload.push_str(CRC_HEADER);
        let checksum = crc16_hex(payload.as_bytes());
        payload.push_str(&checksum);
        Ok(payload)
    }

    /// Parses a BR Code and checks its CRC.
    ///
    /// The txid is taken from template `62` and falls back to `26.02`. The
    /// merchant name and city come back as carried, i.e. already truncated.
    ///
    /// # Errors
    ///
    /// [`PixError::ChecksumMismatch`] when the CRC disagrees,
    /// [`PixError::Malformed`] / [`PixError::MissingField`] when the TLV
    /// structure is broken or incomplete.
    pub fn decode(payload: &str) -> Result<Self, PixError> {
        let fields = parse_fields(payload, 0)?;

        let crc = fields
            .last()
            .filter(|f| f.tag == "63" && f.value.len() == 4)
            .ok_or(PixError::MissingField("63"))?;
        // The checksum covers everything up to and including "6304".
        let expected = crc16_hex(&payload.as_bytes()[..crc.offset]);
        if !expected.eq_ignore_ascii_case(crc.value) {
            return Err(PixError::ChecksumMismatch {
                expected,
                found: crc.value.to_string(),
            });
        }

        let format = find(&fields, "00").ok_or(PixError::MissingField("00"))?;
        if format.value != "01" {
            return Err(PixError::Malformed {
                offset: format.offset,
                reason: "unsupported payload format",
            });
        }

        let account_field = find(&fields, "26").ok_or(PixError::MissingField("26"))?;
        let account = parse_fields(account_field.value, account_field.offset)?;
        let gui = find(&account, "00").ok_or(PixError::MissingField("26.00"))?;
        if !gui.value.eq_ignore_ascii_case(GUI) {
            return Err(PixError::Malformed {
                offset: gui.offset,
                reason: "not a PIX merchant account",
            });
        }
        let key = find(&account, "01").ok_or(PixError::MissingField("26.01"))?;

        let amount = find(&fields, "54")
            .map(|f| {
                parse_amount(f.value).ok_or(PixError::Malformed {
                    offset: f.offset,
                    reason: "amount is not a decimal with two fraction digits",
                })
            })
            .transpose()?;

        let merchant_name = find(&fields, "59").ok_or(PixError::MissingField("59"))?;
        let merchant_city = find(&fields, "60").ok_or(PixError::MissingField("60"))?;

        let additional = match find(&fields, "62") {
            Some(f) => parse_fields(f.value, f.offset)?,
            None => Vec::new(),
        };
        let txid = find(&additional, "05")
            .or_else(|| find(&account, "02"))
            .map(|f| f.value.to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            key: key.value.to_string(),
            merchant_name: merchant_name.value.to_string(),
            merchant_city: merchant_city.value.to_string(),
            amount,
            txid,
        })
    }
}

/// One TLV field; `offset` is where its value starts in the whole payload.
#[derive(Clone, Copy, Debug)]
struct Field<'a> {
    tag: &'a str,
    offset: usize,
    value: &'a str,
}

fn find<'a>(fields: &[Field<'a>], tag: &str) -> Option<Field<'a>> {
    fields.iter().find(|f| f.tag == tag).copied()
}

fn parse_fields(s: &str, base: usize) -> Result<Vec<Field<'_>>, PixError> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < s.len() {
        let header = s.get(pos..pos + 4).ok_or(PixError::Malformed {
            offset: base + pos,
            reason: "truncated field header",
        })?;
        if !header.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PixError::Malformed {
                offset: base + pos,
                reason: "tag and length must be digits",
            });
        }
        let (tag, len) = header.split_at(2);
        let len: usize = len.parse().map_err(|_| PixError::Malformed {
            offset: base + pos + 2,
            reason: "bad length",
        })?;

        let start = pos + 4;
        let value = s.get(start..start + len).ok_or(PixError::Malformed {
            offset: base + start,
            reason: "value runs past the end",
        })?;
        fields.push(Field {
            tag,
            offset: base + start,
            value,
        });
        pos = start + len;
    }

    Ok(fields)
}

fn parse_amount(s: &str) -> Option<Money> {
    let (reais, centavos) = s.split_once('.').unwrap_or((s, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if reais.is_empty() || centavos.len() > 2 || !digits(reais) || !digits(centavos) {
        return None;
    }

    let reais: u64 = reais.parse().ok()?;
    let centavos: u64 = format!("{centavos:0<2}").parse().ok()?;
    reais.checked_mul(100)?.checked_add(centavos).map(Money::from_cents)
}

/// Cuts `s` to at most `max_bytes` bytes without splitting a character.
#[must_use]
pub fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// One EMV field: two-digit id, two-digit length, value.
///
/// The length counts UTF-8 bytes as EMV QRCPS defines it, not characters:
/// `"JOÃO"` is `05`, never `04`.
fn tlv(tag: &'static str, value: &str) -> Result<String, PixError> {
    let len = value.len();
    if len > MAX_FIELD_BYTES {
        return Err(PixError::FieldTooLong { tag, len });
    }
    let id = tag.rsplit('.').next().unwrap_or(tag);
    Ok(format!("{id}{len:02}{value}"))
}
