use super::Error;
use encoding_rs::Encoding;
use row::{Row, Value};

/// Recoder translates text between character sets: text is encoded
/// with the source charset and the resulting bytes decoded with the target.
#[derive(Debug, Clone, Copy)]
pub struct Recoder {
    from: &'static Encoding,
    to: &'static Encoding,
}

impl Recoder {
    pub fn new(from: &str, to: &str) -> Result<Self, Error> {
        let lookup = |label: &str| {
            Encoding::for_label(label.as_bytes()).ok_or_else(|| Error::Charset(label.to_string()))
        };
        Ok(Self {
            from: lookup(from)?,
            to: lookup(to)?,
        })
    }

    pub fn recode(&self, text: &str) -> String {
        let (bytes, _, _) = self.from.encode(text);
        let (text, _, _) = self.to.decode(&bytes);
        text.into_owned()
    }

    /// Recode every text value of `row` in place.
    pub fn recode_row(&self, row: &mut Row) {
        for column in row.iter_mut() {
            if let Value::Text(text) = &column.value {
                column.value = Value::Text(self.recode(text));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_recoding() {
        // "Grüße" written as UTF-8 but read as windows-1252.
        let recoder = Recoder::new("windows-1252", "utf-8").unwrap();
        assert_eq!(recoder.recode("GrÃ¼ÃŸe"), "Grüße");

        let recoder = Recoder::new("utf-8", "windows-1252").unwrap();
        assert_eq!(recoder.recode("Grüße"), "GrÃ¼ÃŸe");

        insta::assert_snapshot!(Recoder::new("utf-8", "klingon").unwrap_err(), @r###"unknown character set "klingon""###);
    }
}
