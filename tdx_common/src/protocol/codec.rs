//! Payload primitives: variable-length signed integers, float volumes,
//! GBK-encoded names and the two date layouts used by candlesticks.
use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use encoding_rs::GBK;

use crate::error::TdxError;
use crate::market::KlinePeriod;
use crate::result::Result;

/// Intraday candlestick dates count years from here.
const PACKED_YEAR_BASE: i32 = 2004;
/// Longest encoding `put_varint` produces for an `i64`.
const MAX_VARINT_LEN: usize = 10;

/// Bounds-checked cursor over a response payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Starts reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(TdxError::decode(format!(
                "need {} bytes at offset {}, only {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Skips `n` bytes of unknown or reserved content.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Signed variable-length integer.
    ///
    /// The first byte carries a continuation bit, a sign bit and six value
    /// bits; every following byte carries a continuation bit and seven more.
    pub fn varint(&mut self) -> Result<i64> {
        let start = self.pos;
        let first = self.u8()?;
        let negative = first & 0x40 != 0;
        let mut value = (first & 0x3F) as i64;
        let mut shift = 6;
        let mut more = first & 0x80 != 0;
        while more {
            if self.pos - start >= MAX_VARINT_LEN {
                return Err(TdxError::decode(format!("varint at offset {} is too long", start)));
            }
            let b = self.u8()?;
            value |= ((b & 0x7F) as i64) << shift;
            shift += 7;
            more = b & 0x80 != 0;
        }
        if !negative {
            return Ok(value);
        }
        value
            .checked_neg()
            .ok_or_else(|| TdxError::decode(format!("varint at offset {} overflows", start)))
    }

    /// Four-byte float used for volumes and turnover.
    pub fn volume(&mut self) -> Result<f64> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
    }

    /// Fixed-width GBK text, trailing NUL and space padding removed.
    pub fn gbk(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        let (text, _had_errors) = GBK.decode_without_bom_handling(raw);
        Ok(text.trim_end_matches(['\0', ' ']).to_string())
    }

    /// Fixed-width ASCII text such as a security code.
    pub fn ascii(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        Ok(String::from_utf8_lossy(raw).trim_end_matches('\0').to_string())
    }

    /// Minutes since midnight.
    pub fn minute_of_day(&mut self) -> Result<NaiveTime> {
        let minutes = self.u16()? as u32;
        NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
            .ok_or_else(|| TdxError::decode(format!("invalid minute of day {}", minutes)))
    }

    /// Candlestick timestamp; layout depends on whether `period` is intraday.
    pub fn kline_time(&mut self, period: KlinePeriod) -> Result<NaiveDateTime> {
        if period.is_intraday() {
            let packed = self.u16()?;
            let minutes = self.u16()? as u32;
            let year = (packed >> 11) as i32 + PACKED_YEAR_BASE;
            let month = ((packed % 2048) / 100) as u32;
            let day = ((packed % 2048) % 100) as u32;
            let date = NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| TdxError::decode(format!("invalid packed date 0x{:04X}", packed)))?;
            let time = NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
                .ok_or_else(|| TdxError::decode(format!("invalid minute of day {}", minutes)))?;
            Ok(date.and_time(time))
        } else {
            let ymd = self.u32()?;
            let date = date_from_u32(ymd)?;
            Ok(date.and_time(session_close()))
        }
    }
}

/// Daily and longer bars are stamped with the session close.
pub fn session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// `YYYYMMDD` as used by history requests and daily bars.
pub fn date_to_u32(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Inverse of [`date_to_u32`].
pub fn date_from_u32(ymd: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt((ymd / 10_000) as i32, (ymd % 10_000) / 100, ymd % 100)
        .ok_or_else(|| TdxError::decode(format!("invalid date {}", ymd)))
}

/// Appends `value` in the variable-length layout read by [`PayloadReader::varint`].
pub fn put_varint(dst: &mut BytesMut, value: i64) {
    let mut rest = value.unsigned_abs();
    let mut first = (rest & 0x3F) as u8;
    if value < 0 {
        first |= 0x40;
    }
    rest >>= 6;
    if rest > 0 {
        first |= 0x80;
    }
    dst.put_u8(first);
    while rest > 0 {
        let mut b = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest > 0 {
            b |= 0x80;
        }
        dst.put_u8(b);
    }
}

/// Appends a four-byte float volume.
pub fn put_volume(dst: &mut BytesMut, value: f64) {
    dst.put_slice(&(value as f32).to_le_bytes());
}

/// Appends `text` GBK-encoded, NUL-padded or truncated to `width` bytes.
pub fn put_gbk(dst: &mut BytesMut, text: &str, width: usize) {
    let (encoded, _, _) = GBK.encode(text);
    let n = encoded.len().min(width);
    dst.put_slice(&encoded[..n]);
    dst.put_bytes(0, width - n);
}

/// Appends a candlestick timestamp in the layout matching `period`.
pub fn put_kline_time(dst: &mut BytesMut, period: KlinePeriod, at: NaiveDateTime) -> Result<()> {
    if period.is_intraday() {
        let offset = at.year() - PACKED_YEAR_BASE;
        if !(0..32).contains(&offset) {
            return Err(TdxError::validation(format!(
                "year {} cannot be packed into an intraday timestamp",
                at.year()
            )));
        }
        let packed = ((offset as u16) << 11) | (at.month() * 100 + at.day()) as u16;
        dst.put_u16_le(packed);
        dst.put_u16_le((at.hour() * 60 + at.minute()) as u16);
    } else {
        dst.put_u32_le(date_to_u32(at.date()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x00], 0)]
    #[case(&[0x05], 5)]
    #[case(&[0x45], -5)]
    #[case(&[0x3F], 63)]
    #[case(&[0x80, 0x01], 64)]
    #[case(&[0xC0, 0x01], -64)]
    #[case(&[0xA8, 0x9C, 0x01], 0x28 | (0x1C << 6) | (1 << 13))]
    fn varint_decodes_known_encodings(#[case] bytes: &[u8], #[case] expected: i64) {
        let mut reader = PayloadReader::new(bytes);
        assert_eq!(reader.varint().unwrap(), expected);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn varint_writer_matches_reader_across_magnitudes() {
        let values = [0i64, 1, -1, 63, -63, 64, 8191, 8192, -123_456, 987_654_321, i64::MAX / 4];
        let mut buf = BytesMut::new();
        for v in values {
            put_varint(&mut buf, v);
        }
        let mut reader = PayloadReader::new(&buf);
        for v in values {
            assert_eq!(reader.varint().unwrap(), v);
        }
    }

    #[test]
    fn truncated_varint_is_a_decode_error() {
        let mut reader = PayloadReader::new(&[0x80]);
        assert!(matches!(reader.varint(), Err(TdxError::Decode(_))));
    }

    #[test]
    fn negated_minimum_varint_is_a_decode_error() {
        let mut bytes = vec![0xC0];
        bytes.extend([0x80; 8]);
        bytes.push(0x02);
        let mut reader = PayloadReader::new(&bytes);
        assert!(matches!(reader.varint(), Err(TdxError::Decode(_))));
    }

    #[test]
    fn short_reads_report_offset() {
        let mut reader = PayloadReader::new(&[1, 2, 3]);
        reader.skip(2).unwrap();
        let err = reader.u16().unwrap_err().to_string();
        assert!(err.contains("offset 2"), "{}", err);
    }

    #[test]
    fn gbk_names_are_decoded_and_trimmed() {
        let mut buf = BytesMut::new();
        put_gbk(&mut buf, "平安银行", 8);
        put_gbk(&mut buf, "ST", 8);
        assert_eq!(buf.len(), 16);
        let mut reader = PayloadReader::new(&buf);
        assert_eq!(reader.gbk(8).unwrap(), "平安银行");
        assert_eq!(reader.gbk(8).unwrap(), "ST");
    }

    #[test]
    fn intraday_kline_time_layout() {
        // 2024-03-15 09:35
        let packed: u16 = (20 << 11) | 315;
        let mut buf = BytesMut::new();
        buf.put_u16_le(packed);
        buf.put_u16_le(9 * 60 + 35);
        let at = PayloadReader::new(&buf).kline_time(KlinePeriod::FiveMinute).unwrap();
        assert_eq!(at.to_string(), "2024-03-15 09:35:00");

        let mut again = BytesMut::new();
        put_kline_time(&mut again, KlinePeriod::FiveMinute, at).unwrap();
        assert_eq!(again, buf);
    }

    #[test]
    fn daily_kline_time_is_stamped_at_session_close() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(20231229);
        let at = PayloadReader::new(&buf).kline_time(KlinePeriod::Day).unwrap();
        assert_eq!(at.to_string(), "2023-12-29 15:00:00");
    }

    #[test]
    fn invalid_dates_are_decode_errors() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(20231340);
        assert!(matches!(
            PayloadReader::new(&buf).kline_time(KlinePeriod::Month),
            Err(TdxError::Decode(_))
        ));
    }

    #[test]
    fn volume_is_a_little_endian_float() {
        let mut buf = BytesMut::new();
        put_volume(&mut buf, 1500.5);
        assert_eq!(PayloadReader::new(&buf).volume().unwrap(), 1500.5);
    }
}
