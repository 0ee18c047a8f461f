//! SOAP envelopes and response scraping for ONVIF PTZ.
//!
//! Responses are scanned as text rather than parsed with a full XML stack:
//! only a handful of attributes are needed and camera firmwares disagree on
//! namespace prefixes, so matching is prefix-agnostic.

use base64::Engine;
use ptz_core::{BackendPose, PtzCommand};
use sha1::{Digest, Sha1};

const NS_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";
const NS_PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
const NS_MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";
const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";

// ============================================================================
// Requests
// ============================================================================

/// WS-Security `UsernameToken` header with a password digest:
/// `Base64(SHA1(nonce + created + password))`.
pub(crate) fn security_header(username: &str, password: &str) -> String {
    let nonce: [u8; 16] = rand::random();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    security_header_with(username, password, &nonce, &created)
}

fn security_header_with(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    let engine = base64::engine::general_purpose::STANDARD;

    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = engine.encode(hasher.finalize());

    format!(
        r#"<s:Header><Security xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" s:mustUnderstand="true"><UsernameToken><Username>{username}</Username><Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{digest}</Password><Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{nonce}</Nonce><Created xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{created}</Created></UsernameToken></Security></s:Header>"#,
        username = xml_escape(username),
        nonce = engine.encode(nonce),
    )
}

fn envelope(header: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="{NS_ENVELOPE}" xmlns:tptz="{NS_PTZ}" xmlns:trt="{NS_MEDIA}" xmlns:tt="{NS_SCHEMA}">{header}<s:Body>{body}</s:Body></s:Envelope>"#
    )
}

/// One ONVIF operation, rendered to its SOAP body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Request<'a> {
    GetProfiles,
    ContinuousMove { token: &'a str, cmd: PtzCommand },
    Stop { token: &'a str },
    GotoHomePosition { token: &'a str },
    AbsoluteZoom { token: &'a str, level: f32 },
    RelativeZoom { token: &'a str, delta: f32 },
    GetStatus { token: &'a str },
}

impl Request<'_> {
    /// SOAP action name, used in logs and the `action` content-type parameter.
    pub(crate) fn action(&self) -> &'static str {
        match self {
            Self::GetProfiles => "GetProfiles",
            Self::ContinuousMove { .. } => "ContinuousMove",
            Self::Stop { .. } => "Stop",
            Self::GotoHomePosition { .. } => "GotoHomePosition",
            Self::AbsoluteZoom { .. } => "AbsoluteMove",
            Self::RelativeZoom { .. } => "RelativeMove",
            Self::GetStatus { .. } => "GetStatus",
        }
    }

    /// Full action URI for the `Content-Type` header.
    pub(crate) fn action_uri(&self) -> String {
        let ns = match self {
            Self::GetProfiles => NS_MEDIA,
            _ => NS_PTZ,
        };
        format!("{ns}/{}", self.action())
    }

    /// Whether this request goes to the media service instead of PTZ.
    pub(crate) fn is_media(&self) -> bool {
        matches!(self, Self::GetProfiles)
    }

    fn body(&self) -> String {
        match self {
            Self::GetProfiles => "<trt:GetProfiles/>".to_string(),
            Self::ContinuousMove { token, cmd } => format!(
                r#"<tptz:ContinuousMove><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:Velocity><tt:PanTilt x="{:.3}" y="{:.3}"/><tt:Zoom x="{:.3}"/></tptz:Velocity></tptz:ContinuousMove>"#,
                xml_escape(token),
                cmd.pan,
                cmd.tilt,
                cmd.zoom
            ),
            Self::Stop { token } => format!(
                "<tptz:Stop><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:PanTilt>true</tptz:PanTilt><tptz:Zoom>true</tptz:Zoom></tptz:Stop>",
                xml_escape(token)
            ),
            Self::GotoHomePosition { token } => format!(
                "<tptz:GotoHomePosition><tptz:ProfileToken>{}</tptz:ProfileToken></tptz:GotoHomePosition>",
                xml_escape(token)
            ),
            Self::AbsoluteZoom { token, level } => format!(
                r#"<tptz:AbsoluteMove><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:Position><tt:Zoom x="{:.3}"/></tptz:Position></tptz:AbsoluteMove>"#,
                xml_escape(token),
                level
            ),
            Self::RelativeZoom { token, delta } => format!(
                r#"<tptz:RelativeMove><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:Translation><tt:Zoom x="{:.3}"/></tptz:Translation></tptz:RelativeMove>"#,
                xml_escape(token),
                delta
            ),
            Self::GetStatus { token } => format!(
                "<tptz:GetStatus><tptz:ProfileToken>{}</tptz:ProfileToken></tptz:GetStatus>",
                xml_escape(token)
            ),
        }
    }

    /// Renders the complete envelope with a fresh security header.
    pub(crate) fn render(&self, username: &str, password: &str) -> String {
        let header = if username.is_empty() {
            String::new()
        } else {
            security_header(username, password)
        };
        envelope(&header, &self.body())
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Derives a sibling service URL from the device service endpoint, e.g.
/// `.../onvif/device_service` to `.../onvif/ptz_service`.
pub(crate) fn service_url(endpoint: &str, service: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/device_service") {
        if let Some((prefix, _)) = base.rsplit_once('/') {
            return format!("{prefix}/{service}");
        }
    }
    if base.ends_with("/onvif") {
        return format!("{base}/{service}");
    }
    match base.split_once("://") {
        Some((_, rest)) if rest.contains('/') => match base.rsplit_once('/') {
            Some((prefix, _)) => format!("{prefix}/{service}"),
            None => format!("{base}/onvif/{service}"),
        },
        _ => format!("{base}/onvif/{service}"),
    }
}

// ============================================================================
// Response Scraping
// ============================================================================

/// Byte offsets of every start tag named `tag`, with or without a
/// namespace prefix.
fn start_tags<'a>(xml: &'a str, tag: &'a str) -> impl Iterator<Item = usize> + 'a {
    xml.match_indices(tag).filter_map(move |(idx, _)| {
        let before = xml.get(..idx)?;
        let after = xml.get(idx + tag.len()..)?;

        let opens = before.ends_with('<')
            || before
                .rsplit_once('<')
                .map(|(_, prefix)| {
                    prefix.ends_with(':')
                        && !prefix.starts_with('/')
                        && prefix.chars().all(|c| c.is_alphanumeric() || c == ':' || c == '_')
                })
                .unwrap_or(false);
        let ends = after
            .chars()
            .next()
            .map(|c| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(false);

        (opens && ends).then(|| before.rfind('<').unwrap_or(idx))
    })
}

/// Value of `attr` on the first `tag` element that carries it.
pub(crate) fn extract_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    for start in start_tags(xml, tag) {
        let element = xml.get(start..)?;
        let element = element.split_once('>').map_or(element, |(head, _)| head);

        for quote in ['"', '\''] {
            let needle = format!(" {attr}={quote}");
            if let Some((_, rest)) = element.split_once(needle.as_str()) {
                if let Some((value, _)) = rest.split_once(quote) {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Content of the first `tag` element (between its start and end tags).
pub(crate) fn extract_section<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let start = start_tags(xml, tag).next()?;
    let rest = xml.get(start..)?;
    let (_, content) = rest.split_once('>')?;

    let plain = format!("</{tag}>");
    let prefixed = format!(":{tag}>");
    let end = content
        .find(plain.as_str())
        .or_else(|| content.find(prefixed.as_str()).and_then(|i| content.get(..i)?.rfind("</")))?;
    content.get(..end)
}

/// Parses a `GetStatusResponse` into a pose. Missing zoom reads as 0.
pub(crate) fn parse_status(xml: &str) -> Option<BackendPose> {
    let position = extract_section(xml, "Position").unwrap_or(xml);
    let number = |tag: &str, attr: &str| -> Option<f32> {
        extract_attribute(position, tag, attr)?
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
    };

    let pan = number("PanTilt", "x")?;
    let tilt = number("PanTilt", "y")?;
    let zoom = number("Zoom", "x").unwrap_or(0.0);

    Some(BackendPose {
        pan_pos: pan.clamp(-1.0, 1.0),
        tilt_pos: tilt.clamp(-1.0, 1.0),
        zoom_level: zoom.clamp(0.0, 1.0),
    })
}

/// First media profile token in a `GetProfilesResponse`.
pub(crate) fn parse_profile_token(xml: &str) -> Option<String> {
    extract_attribute(xml, "Profiles", "token").filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"<?xml version="1.0"?>
<SOAP-ENV:Envelope><SOAP-ENV:Body><tptz:GetStatusResponse><tptz:PTZStatus>
<tt:Position><tt:PanTilt space="http://www.onvif.org/ver10/tptz/PanTiltSpaces/PositionGenericSpace" x="0.25" y="-0.5"/>
<tt:Zoom space="http://www.onvif.org/ver10/tptz/ZoomSpaces/PositionGenericSpace" x="0.125"/></tt:Position>
<tt:MoveStatus><tt:PanTilt>IDLE</tt:PanTilt></tt:MoveStatus>
</tptz:PTZStatus></tptz:GetStatusResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

    #[test]
    fn test_service_url() {
        assert_eq!(
            service_url("http://10.0.0.5:2020/onvif/device_service", "ptz_service"),
            "http://10.0.0.5:2020/onvif/ptz_service"
        );
        assert_eq!(
            service_url("http://10.0.0.5/onvif/", "media_service"),
            "http://10.0.0.5/onvif/media_service"
        );
        assert_eq!(
            service_url("http://10.0.0.5:8000", "ptz_service"),
            "http://10.0.0.5:8000/onvif/ptz_service"
        );
    }

    #[test]
    fn test_security_header_digest() {
        let header = security_header_with("admin", "secret", &[0u8; 16], "2024-01-01T00:00:00Z");
        assert!(header.contains("<Username>admin</Username>"));
        assert!(header.contains("PasswordDigest"));
        assert!(header.contains("<Nonce EncodingType"));
        assert!(header.contains("AAAAAAAAAAAAAAAAAAAAAA=="));
        assert!(header.contains("2024-01-01T00:00:00Z"));

        let again = security_header_with("admin", "secret", &[0u8; 16], "2024-01-01T00:00:00Z");
        assert_eq!(header, again);
        let other = security_header_with("admin", "other", &[0u8; 16], "2024-01-01T00:00:00Z");
        assert_ne!(header, other);
    }

    #[test]
    fn test_continuous_move_body() {
        let req = Request::ContinuousMove {
            token: "prof<1>",
            cmd: PtzCommand::new(0.5, -0.25, 0.0),
        };
        let xml = req.render("", "");
        assert!(xml.contains(r#"<tt:PanTilt x="0.500" y="-0.250"/>"#));
        assert!(xml.contains("<tptz:ProfileToken>prof&lt;1&gt;</tptz:ProfileToken>"));
        assert!(!xml.contains("Security"));
        assert_eq!(req.action_uri(), "http://www.onvif.org/ver20/ptz/wsdl/ContinuousMove");
    }

    #[test]
    fn test_zoom_requests_use_ptz_moves() {
        assert_eq!(Request::AbsoluteZoom { token: "t", level: 0.5 }.action(), "AbsoluteMove");
        assert_eq!(Request::RelativeZoom { token: "t", delta: 0.1 }.action(), "RelativeMove");
        assert!(Request::GetProfiles.is_media());
    }

    #[test]
    fn test_parse_status() {
        let pose = parse_status(STATUS).unwrap();
        assert_eq!(pose.pan_pos, 0.25);
        assert_eq!(pose.tilt_pos, -0.5);
        assert_eq!(pose.zoom_level, 0.125);
    }

    #[test]
    fn test_parse_status_without_position() {
        assert!(parse_status("<Envelope><Body/></Envelope>").is_none());
        let no_zoom = r#"<tt:Position><tt:PanTilt x="0.1" y="0.2"/></tt:Position>"#;
        assert_eq!(parse_status(no_zoom).unwrap().zoom_level, 0.0);
    }

    #[test]
    fn test_parse_profile_token() {
        let xml = r#"<trt:GetProfilesResponse><trt:Profiles fixed="true" token="main_profile"><tt:Name>main</tt:Name></trt:Profiles><trt:Profiles token="sub"/></trt:GetProfilesResponse>"#;
        assert_eq!(parse_profile_token(xml), Some("main_profile".to_string()));
        assert_eq!(parse_profile_token("<trt:GetProfilesResponse/>"), None);
    }

    #[test]
    fn test_extract_skips_closing_and_longer_tags() {
        let xml = r#"<a:ZoomLimits x="9"/><a:Zoom x="0.3"/></a:Zoom>"#;
        assert_eq!(extract_attribute(xml, "Zoom", "x"), Some("0.3".to_string()));
        assert_eq!(extract_section("<Position><x/></Position>", "Position"), Some("<x/>"));
    }
}
