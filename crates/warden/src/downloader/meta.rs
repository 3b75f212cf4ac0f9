//! Archive metadata records
//!
//! Every archive carries a small INI record next to it describing where it
//! came from. Each downloader reads the `[General]` section and claims the
//! record when its own keys are present; emitting a record and re-parsing it
//! must land on the same origin identity.

use ini::{Ini, Properties};

use crate::downloader::error::{DownloadError, Result};

/// Section every origin reads its identity keys from
pub const GENERAL_SECTION: &str = "General";

/// Parse a metadata record from its textual form
pub fn parse_meta(text: &str) -> Result<Ini> {
    Ini::load_from_str(text).map_err(|err| DownloadError::InvalidMeta {
        message: err.to_string(),
    })
}

/// The `[General]` section of a record, if present
pub fn general_section(meta: &Ini) -> Option<&Properties> {
    meta.section(Some(GENERAL_SECTION))
}

/// Render a record back to its textual form
pub fn meta_to_string(meta: &Ini) -> String {
    let mut buffer = Vec::new();
    meta.write_to(&mut buffer)
        .expect("writing INI to memory cannot fail");
    String::from_utf8(buffer).expect("INI output is UTF-8")
}

/// Read a numeric identity field, rejecting records with mangled values
pub fn parse_id_field(props: &Properties, key: &str) -> Result<Option<u64>> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| DownloadError::InvalidMeta {
                message: format!("field '{key}' is not a numeric id: '{raw}'"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_general_section_keys() {
        let meta = parse_meta("[General]\ngameName=SkyrimSpecialEdition\nmodID=266\n").unwrap();
        let props = general_section(&meta).unwrap();
        assert_eq!(props.get("gameName"), Some("SkyrimSpecialEdition"));
        assert_eq!(parse_id_field(props, "modID").unwrap(), Some(266));
        assert_eq!(parse_id_field(props, "fileID").unwrap(), None);
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let meta = parse_meta("[General]\nmodID=oops\n").unwrap();
        let props = general_section(&meta).unwrap();
        assert!(parse_id_field(props, "modID").is_err());
    }

    #[test]
    fn record_round_trips_through_text() {
        let meta = parse_meta("[General]\ndirectURL=https://example.com/a.7z\n").unwrap();
        let text = meta_to_string(&meta);
        let reparsed = parse_meta(&text).unwrap();
        assert_eq!(
            general_section(&reparsed).unwrap().get("directURL"),
            Some("https://example.com/a.7z")
        );
    }
}
