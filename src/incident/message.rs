//! Scanning one fetched message for status phrases.

use std::borrow::Cow;
use std::ops::ControlFlow;

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use crate::incident::status::{StatusPhrase, find_statuses, has_section_delimiter};

/// Status phrases found in a raw RFC 5322 message.
///
/// Only multipart messages are scanned; a single-part message yields
/// nothing. Parts are walked depth-first and every `text/plain` or
/// `text/html` part contributes its phrases. Scanning stops after the first
/// part carrying the "You ... notifications" footer.
pub fn process_message(raw: &[u8]) -> Vec<StatusPhrase> {
    let Some(message) = MessageParser::default().parse(raw) else {
        debug!(bytes = raw.len(), "Message did not parse, nothing to scan");
        return Vec::new();
    };

    let mut statuses = Vec::new();
    if !is_multipart(&message) {
        // FIXME: single-part messages are never scanned.
        debug!("Single-part message skipped");
        return statuses;
    }

    if walk_parts(&message, &mut statuses).is_break() {
        debug!("Notification footer reached, remaining parts skipped");
    }
    statuses
}

fn is_multipart(message: &Message<'_>) -> bool {
    matches!(
        message.root_part().body,
        PartType::Multipart(_) | PartType::Message(_)
    )
}

fn walk_parts(message: &Message<'_>, statuses: &mut Vec<StatusPhrase>) -> ControlFlow<()> {
    for part in &message.parts {
        if let PartType::Message(nested) = &part.body {
            if walk_parts(nested, statuses).is_break() {
                return ControlFlow::Break(());
            }
            continue;
        }

        let Some(text) = scannable_text(part) else {
            continue;
        };
        statuses.extend(find_statuses(&text));
        if has_section_delimiter(&text) {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// `type/subtype` in lower case. Missing or malformed headers mean
/// `text/plain`.
fn media_type(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => "text/plain".to_string(),
        },
        None => "text/plain".to_string(),
    }
}

/// Decoded body of a text part, with undecodable sequences dropped.
fn scannable_text<'a>(part: &'a MessagePart<'_>) -> Option<Cow<'a, str>> {
    let media = media_type(part);
    if media != "text/plain" && media != "text/html" {
        return None;
    }
    let ascii_only = part
        .content_type()
        .and_then(|ct| ct.attribute("charset"))
        .is_some_and(|cs| {
            cs.eq_ignore_ascii_case("us-ascii") || cs.eq_ignore_ascii_case("ascii")
        });
    let text = match &part.body {
        PartType::Text(text) | PartType::Html(text) => Cow::Borrowed(&**text),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => String::from_utf8_lossy(bytes),
        PartType::Message(_) | PartType::Multipart(_) => return None,
    };
    Some(drop_undecodable(text, ascii_only))
}

/// Removes what the declared charset could not decode. The MIME decoder
/// substitutes U+FFFD for bad sequences, but reads US-ASCII as Latin-1, so
/// for ASCII parts every non-ASCII character goes too.
fn drop_undecodable(text: Cow<'_, str>, ascii_only: bool) -> Cow<'_, str> {
    let keep = |c: char| c != char::REPLACEMENT_CHARACTER && (!ascii_only || c.is_ascii());
    if text.chars().all(keep) {
        text
    } else {
        Cow::Owned(text.chars().filter(|&c| keep(c)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multipart(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut raw = b"From: Status Page <noreply@statuspage.io>\r\n\
Subject: [Azion] Incident update\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"XYZ\"\r\n\
\r\n"
            .to_vec();
        for (content_type, body) in parts {
            raw.extend_from_slice(b"--XYZ\r\nContent-Type: ");
            raw.extend_from_slice(content_type.as_bytes());
            raw.extend_from_slice(b"\r\n\r\n");
            raw.extend_from_slice(body);
            raw.extend_from_slice(b"\r\n");
        }
        raw.extend_from_slice(b"--XYZ--\r\n");
        raw
    }

    #[test]
    fn scans_plain_and_html_parts() {
        let raw = multipart(&[
            ("text/plain; charset=utf-8", b"New incident: CDN latency"),
            ("text/html; charset=utf-8", b"<p>Incident status: Identified</p>"),
        ]);
        assert_eq!(
            process_message(&raw),
            vec![StatusPhrase::NewIncident, StatusPhrase::Identified]
        );
    }

    #[test]
    fn duplicates_across_parts_are_kept() {
        let raw = multipart(&[
            ("text/plain", b"Incident resolved"),
            ("text/html", b"<b>Incident resolved</b>"),
        ]);
        assert_eq!(
            process_message(&raw),
            vec![StatusPhrase::Resolved, StatusPhrase::Resolved]
        );
    }

    #[test]
    fn footer_stops_later_parts() {
        let raw = multipart(&[
            (
                "text/plain",
                b"Incident status: Monitoring\r\nYou get these notifications as a subscriber",
            ),
            ("text/html", b"<p>Incident resolved</p>"),
        ]);
        assert_eq!(process_message(&raw), vec![StatusPhrase::Monitoring]);
    }

    #[test]
    fn non_text_parts_are_ignored() {
        let raw = multipart(&[
            ("application/json", b"{\"status\": \"New incident\"}"),
            ("text/plain", b"An update has been posted"),
        ]);
        assert_eq!(process_message(&raw), vec![StatusPhrase::UpdatePosted]);
    }

    #[test]
    fn single_part_message_yields_nothing() {
        let raw = b"From: noreply@statuspage.io\r\n\
Subject: Incident resolved\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Incident resolved\r\n";
        assert!(process_message(raw).is_empty());
    }

    #[test]
    fn undecodable_bytes_are_dropped() {
        let raw = multipart(&[("text/plain; charset=utf-8", b"Incid\xffent resolved")]);
        assert_eq!(process_message(&raw), vec![StatusPhrase::Resolved]);
    }

    #[test]
    fn bytes_outside_us_ascii_are_dropped() {
        let raw = multipart(&[("text/plain; charset=us-ascii", b"Incid\xffent resolved")]);
        assert_eq!(process_message(&raw), vec![StatusPhrase::Resolved]);

        let raw = multipart(&[("text/html; charset=\"US-ASCII\"", b"<p>New\xe9 incident</p>")]);
        assert_eq!(process_message(&raw), vec![StatusPhrase::NewIncident]);
    }

    #[test]
    fn declared_charset_is_honoured() {
        let raw = multipart(&[(
            "text/plain; charset=iso-8859-1",
            b"Caf\xe9 CDN: Incident status: Identified",
        )]);
        assert_eq!(process_message(&raw), vec![StatusPhrase::Identified]);
    }

    #[test]
    fn quoted_printable_body_is_decoded() {
        let mut raw = b"From: noreply@statuspage.io\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
Incident=20resolved=2E\r\n"
            .to_vec();
        raw.extend_from_slice(b"--XYZ--\r\n");
        assert_eq!(process_message(&raw), vec![StatusPhrase::Resolved]);
    }

    #[test]
    fn nested_multipart_is_walked() {
        let raw = b"From: noreply@statuspage.io\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"OUTER\"\r\n\
\r\n\
--OUTER\r\n\
Content-Type: multipart/alternative; boundary=\"INNER\"\r\n\
\r\n\
--INNER\r\n\
Content-Type: text/plain\r\n\
\r\n\
New incident\r\n\
--INNER--\r\n\
--OUTER\r\n\
Content-Type: text/plain\r\n\
\r\n\
Incident resolved\r\n\
--OUTER--\r\n";
        assert_eq!(
            process_message(raw),
            vec![StatusPhrase::NewIncident, StatusPhrase::Resolved]
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(process_message(b"").is_empty());
    }

    #[test]
    fn drop_undecodable_leaves_clean_text_borrowed() {
        let text = drop_undecodable(Cow::Borrowed("Incident resolved"), false);
        assert!(matches!(text, Cow::Borrowed(_)));
        assert_eq!(drop_undecodable(Cow::Borrowed("a\u{FFFD}b"), false), "ab");
        assert_eq!(drop_undecodable(Cow::Borrowed("caf\u{e9}"), false), "caf\u{e9}");
        assert_eq!(drop_undecodable(Cow::Borrowed("caf\u{e9}"), true), "caf");
    }
}
