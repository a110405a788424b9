//! Protocol-aware denial formatting.
//!
//! The output shape is negotiated from the inbound `Content-Type` and the
//! SOAP-action header: SOAP 1.1 and 1.2 fault envelopes for SOAP-shaped
//! requests (when enabled), JSON for everything else. Rendering is a pure
//! function over the error triple.

use palisade_core::config::DenialConfig;
use palisade_core::context::ErrorBody;
use serde_json::json;

/// Header carrying the SOAP 1.1 action.
pub const SOAP_ACTION_HEADER: &str = "soapaction";

const CONTENT_TYPE_XML: &str = "text/xml";
const CONTENT_TYPE_SOAP12: &str = "application/soap+xml";
const CONTENT_TYPE_JSON: &str = "application/json";

/// The denial body shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyFormat {
    /// JSON error object.
    Json,
    /// SOAP 1.1 fault envelope.
    Soap11,
    /// SOAP 1.2 fault envelope.
    Soap12,
}

/// Choose the output shape for a denial.
#[must_use]
pub fn negotiate(
    content_type: Option<&str>,
    soap_action: Option<&str>,
    config: &DenialConfig,
) -> DenyFormat {
    if !config.soap_enabled {
        return DenyFormat::Json;
    }
    let Some(content_type) = content_type else {
        return DenyFormat::Json;
    };
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if essence.eq_ignore_ascii_case(CONTENT_TYPE_SOAP12) {
        DenyFormat::Soap12
    } else if essence.eq_ignore_ascii_case(CONTENT_TYPE_XML) && soap_action.is_some() {
        DenyFormat::Soap11
    } else {
        DenyFormat::Json
    }
}

/// Render the denial body; returns the body and its content type.
#[must_use]
pub fn render(error: &ErrorBody, format: DenyFormat) -> (String, &'static str) {
    match format {
        DenyFormat::Json => (
            json!({
                "errorCode": error.code.to_string(),
                "errorMessage": error.message,
                "errorDescription": error.description,
            })
            .to_string(),
            CONTENT_TYPE_JSON,
        ),
        DenyFormat::Soap11 => (
            format!(
                concat!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
                    "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\">",
                    "<soapenv:Body><soapenv:Fault>",
                    "<faultcode>soapenv:Client</faultcode>",
                    "<faultstring>{message}</faultstring>",
                    "<detail><errorCode>{code}</errorCode>",
                    "<errorDescription>{description}</errorDescription></detail>",
                    "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
                ),
                message = xml_escape(&error.message),
                code = error.code,
                description = xml_escape(&error.description),
            ),
            CONTENT_TYPE_XML,
        ),
        DenyFormat::Soap12 => (
            format!(
                concat!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
                    "<soapenv:Envelope xmlns:soapenv=\"http://www.w3.org/2003/05/soap-envelope\">",
                    "<soapenv:Body><soapenv:Fault>",
                    "<soapenv:Code><soapenv:Value>soapenv:Sender</soapenv:Value></soapenv:Code>",
                    "<soapenv:Reason><soapenv:Text xml:lang=\"en\">{message}</soapenv:Text></soapenv:Reason>",
                    "<soapenv:Detail><errorCode>{code}</errorCode>",
                    "<errorDescription>{description}</errorDescription></soapenv:Detail>",
                    "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
                ),
                message = xml_escape(&error.message),
                code = error.code,
                description = xml_escape(&error.description),
            ),
            CONTENT_TYPE_SOAP12,
        ),
    }
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn soap_config() -> DenialConfig {
        DenialConfig { soap_enabled: true }
    }

    fn error() -> ErrorBody {
        ErrorBody {
            code: 900901,
            message: "Invalid Credentials".to_string(),
            description: "Make sure you have provided the correct security credentials".to_string(),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let (body, content_type) = render(&error(), DenyFormat::Json);
        assert_eq!(content_type, "application/json");

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["errorCode"], "900901");
        assert_eq!(parsed["errorMessage"], "Invalid Credentials");
        assert_eq!(
            parsed["errorDescription"],
            "Make sure you have provided the correct security credentials"
        );
        assert_eq!(parsed.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_soap11_negotiation_needs_action_header() {
        let config = soap_config();
        assert_eq!(
            negotiate(Some("text/xml"), Some("urn:addPet"), &config),
            DenyFormat::Soap11
        );
        // Without the action header an XML request is still JSON.
        assert_eq!(negotiate(Some("text/xml"), None, &config), DenyFormat::Json);
    }

    #[test]
    fn test_soap12_negotiation_by_content_type() {
        let config = soap_config();
        assert_eq!(
            negotiate(Some("application/soap+xml; charset=utf-8"), None, &config),
            DenyFormat::Soap12
        );
    }

    #[test]
    fn test_soap_disabled_forces_json() {
        let config = DenialConfig { soap_enabled: false };
        assert_eq!(
            negotiate(Some("text/xml"), Some("urn:addPet"), &config),
            DenyFormat::Json
        );
        assert_eq!(
            negotiate(Some("application/soap+xml"), None, &config),
            DenyFormat::Json
        );
    }

    #[test]
    fn test_soap11_fault_envelope() {
        let (body, content_type) = render(&error(), DenyFormat::Soap11);
        assert_eq!(content_type, "text/xml");
        assert!(body.contains("<soapenv:Fault>"));
        assert!(body.contains("http://schemas.xmlsoap.org/soap/envelope/"));
        assert!(body.contains("<faultstring>Invalid Credentials</faultstring>"));
        assert!(body.contains("<errorCode>900901</errorCode>"));
    }

    #[test]
    fn test_soap12_fault_envelope() {
        let (body, content_type) = render(&error(), DenyFormat::Soap12);
        assert_eq!(content_type, "application/soap+xml");
        assert!(body.contains("http://www.w3.org/2003/05/soap-envelope"));
        assert!(body.contains("<soapenv:Value>soapenv:Sender</soapenv:Value>"));
        assert!(body.contains("<soapenv:Text xml:lang=\"en\">Invalid Credentials</soapenv:Text>"));
    }

    #[test]
    fn test_xml_escaping() {
        let hostile = ErrorBody {
            code: 900900,
            message: "<script>&\"'".to_string(),
            description: String::new(),
        };
        let (body, _) = render(&hostile, DenyFormat::Soap11);
        assert!(body.contains("&lt;script&gt;&amp;&quot;&apos;"));
        assert!(!body.contains("<script>"));
    }
}
