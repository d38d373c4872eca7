/// Decode raw bytes into text using the declared encoding label, or UTF-8
/// when no label is given or the label is unknown. Invalid sequences are
/// replaced rather than failing: a mangled character is still more useful
/// downstream than a dropped document, and structural parse errors surface
/// separately.
pub fn decode_text(bytes: &[u8], declared: Option<&str>) -> String {
    let encoding = declared
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);

    // `decode` also consumes a leading BOM, which would otherwise break
    // the byte-level content sniffing of callers downstream.
    let (text, actual, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = actual.name(), "replaced invalid byte sequences");
    }
    text.into_owned()
}
