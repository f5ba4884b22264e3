//! Inline image data URLs (`data:image/<subtype>;base64,<payload>`).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::conf::C_IMAGE_PREFIX;
use crate::spec::{EnumFieldValue, SpecDecodedImage};

const C_BASE64_MARKER: &str = ";base64,";

/// `true` iff `value` is a string starting with `data:image`.
///
/// The empty string left behind by a failed attachment fetch is not an image.
pub fn is_image_field(value: &EnumFieldValue) -> bool {
    value
        .as_str()
        .is_some_and(|c_value| c_value.starts_with(C_IMAGE_PREFIX))
}

/// Format token from the MIME subtype of an image data URL.
///
/// The subtype runs up to the first `;` or `,`; a structured suffix is dropped
/// (`svg+xml` -> `svg`), so four-letter tokens such as `jpeg` stay whole.
pub fn derive_image_extension(c_data_url: &str) -> Option<String> {
    let c_rest = c_data_url.strip_prefix(C_IMAGE_PREFIX)?.strip_prefix('/')?;
    let n_end = c_rest.find([';', ',']).unwrap_or(c_rest.len());
    let c_subtype = c_rest[..n_end].split('+').next().unwrap_or_default().trim();
    if c_subtype.is_empty() {
        return None;
    }
    Some(c_subtype.to_ascii_lowercase())
}

/// Decode an image data URL into raw bytes and a format token.
pub fn decode_image_data_url(c_data_url: &str) -> Result<SpecDecodedImage, String> {
    let extension = derive_image_extension(c_data_url)
        .ok_or_else(|| "Image data URL has no MIME subtype.".to_string())?;
    let (_, c_payload) = c_data_url
        .split_once(C_BASE64_MARKER)
        .ok_or_else(|| format!("Image data URL for {extension:?} is not base64 encoded."))?;
    let v_bytes = STANDARD
        .decode(c_payload.trim())
        .map_err(|err| format!("Invalid base64 payload for {extension:?} image: {err}"))?;
    Ok(SpecDecodedImage { v_bytes, extension })
}

/// Build `data:image/<extension>;base64,<payload>` from raw bytes.
pub fn encode_image_data_url(v_bytes: &[u8], extension: &str) -> String {
    format!(
        "{C_IMAGE_PREFIX}/{}{C_BASE64_MARKER}{}",
        extension.to_ascii_lowercase(),
        STANDARD.encode(v_bytes)
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_empty_string_is_not_an_image() {
        assert!(!is_image_field(&EnumFieldValue::from("")));
        assert!(!is_image_field(&EnumFieldValue::Null));
        assert!(!is_image_field(&EnumFieldValue::from("image.png")));
        assert!(is_image_field(&EnumFieldValue::from("data:image/png;base64,QQ==")));
    }

    #[test]
    fn test_decode_single_byte_png() {
        let image = decode_image_data_url("data:image/png;base64,QQ==").expect("decode");
        assert_eq!(image.v_bytes, vec![0x41]);
        assert_eq!(image.extension, "png");
    }

    #[test]
    fn test_extension_parses_full_subtype() {
        assert_eq!(
            derive_image_extension("data:image/jpeg;base64,AA==").as_deref(),
            Some("jpeg")
        );
        assert_eq!(
            derive_image_extension("data:image/svg+xml;base64,AA==").as_deref(),
            Some("svg")
        );
        assert_eq!(derive_image_extension("data:image/GIF,AA==").as_deref(), Some("gif"));
        assert_eq!(derive_image_extension("data:image;base64,AA=="), None);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(decode_image_data_url("data:image/png,QQ==").is_err());
        assert!(decode_image_data_url("data:image/png;base64,@@@").is_err());
        assert!(decode_image_data_url("data:image/;base64,QQ==").is_err());
    }

    proptest! {
        #[test]
        fn test_image_round_trip(v_bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let c_data_url = encode_image_data_url(&v_bytes, "png");
            let image = decode_image_data_url(&c_data_url).expect("decode");
            prop_assert_eq!(image.v_bytes, v_bytes);
            prop_assert_eq!(image.extension, "png");
        }
    }
}
