//! Readable text for panic payloads caught at the dispatch boundary.
use std::any::Any;
use std::fmt;

/// Formats a caught panic payload.
///
/// `String` and `&'static str` payloads print as-is; anything else falls back
/// to `Debug`.
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

pub fn panic_message(payload: Box<dyn Any + Send>) -> PanicMessage {
    PanicMessage(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_payloads_print_verbatim() {
        assert_eq!(panic_message(Box::new("boom")).to_string(), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))).to_string(), "bang");
        assert!(panic_message(Box::new(5_u32)).to_string().contains("Any"));
    }
}
