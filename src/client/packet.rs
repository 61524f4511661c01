//! Decoded engine packets
//!
//! Packets are parsed with roxmltree into a small tree model. Base64 bodies
//! (properties, source, streams) are decoded on the way in so the CLI can
//! print them and tests can compare plain text.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;

use crate::common::{Error, Result};

/// A generic XML element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Text content, base64-decoded when `encoding="base64"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
}

impl Element {
    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        // Namespaced attributes (xsi:type) would collide with plain ones.
        let attributes: BTreeMap<String, String> = node
            .attributes()
            .filter(|a| a.namespace().is_none())
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect();

        let raw: String = node
            .children()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        let text = if raw.trim().is_empty() {
            None
        } else if attributes.get("encoding").map(String::as_str) == Some("base64") {
            Some(decode_text(&raw))
        } else {
            Some(raw)
        };

        Self {
            name: node.tag_name().name().to_string(),
            attributes,
            text,
            children: node
                .children()
                .filter(|n| n.is_element())
                .map(Element::from_node)
                .collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First child element with the given tag name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All child elements with the given tag name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn decode_text(raw: &str) -> String {
    match STANDARD.decode(raw.trim()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// The `<init>` packet sent when an engine connects
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitPacket {
    pub appid: String,
    pub ide_key: String,
    pub session: String,
    pub thread: String,
    pub language: String,
    pub protocol_version: String,
    pub fileuri: String,
}

/// Error element of a failed response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
}

/// A `<response>` packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub command: String,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// The response element itself, with every attribute and child
    pub element: Element,
}

impl Response {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.element.attr(name)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `status` attribute of continuation and status responses
    pub fn status(&self) -> Option<&str> {
        self.attr("status")
    }

    pub fn reason(&self) -> Option<&str> {
        self.attr("reason")
    }

    /// Decoded body text (`source`, `property_value`, `feature_get`)
    pub fn text(&self) -> Option<&str> {
        self.element.text.as_deref()
    }
}

/// A `<stream>` packet carrying redirected output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamPacket {
    pub stream: String,
    pub data: String,
}

/// Any packet an engine sends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Packet {
    Init(InitPacket),
    Response(Response),
    Stream(StreamPacket),
    /// Anything else, kept as a raw element
    Other(Element),
}

impl Packet {
    /// Parse the XML text of one packet
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| Error::Protocol(format!("invalid packet XML: {}", e)))?;
        let root = Element::from_node(doc.root_element());
        let attr = |name: &str| root.attr(name).unwrap_or_default().to_string();

        let tag = root.name.clone();
        let packet = match tag.as_str() {
            "init" => Packet::Init(InitPacket {
                appid: attr("appid"),
                ide_key: attr("ide_key"),
                session: attr("session"),
                thread: attr("thread"),
                language: attr("language"),
                protocol_version: attr("protocol_version"),
                fileuri: attr("fileuri"),
            }),
            "response" => {
                let error = root.child("error").map(|e| ResponseError {
                    code: e.attr("code").and_then(|c| c.parse().ok()).unwrap_or_default(),
                    message: e
                        .child("message")
                        .and_then(|m| m.text.clone())
                        .unwrap_or_default(),
                });
                Packet::Response(Response {
                    command: attr("command"),
                    transaction_id: attr("transaction_id"),
                    error,
                    element: root,
                })
            }
            "stream" => Packet::Stream(StreamPacket {
                stream: attr("type"),
                data: root.text.clone().unwrap_or_default(),
            }),
            _ => Packet::Other(root),
        };
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_init() {
        let packet = Packet::parse(
            r#"<?xml version="1.0" encoding="UTF-8"?><init appid="dbgp-engine" ide_key="" session="" thread="42" parent="" language="AutoHotkey" protocol_version="1.0" fileuri="file:///a.ahk"/>"#,
        )
        .unwrap();
        match packet {
            Packet::Init(init) => {
                assert_eq!(init.appid, "dbgp-engine");
                assert_eq!(init.thread, "42");
                assert_eq!(init.fileuri, "file:///a.ahk");
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let packet = Packet::parse(
            r#"<response command="breakpoint_get" transaction_id="3" id="9"><error code="205"><message>Breakpoint 9 not found</message></error></response>"#,
        )
        .unwrap();
        let Packet::Response(response) = packet else {
            panic!("expected a response");
        };
        assert_eq!(response.transaction_id, "3");
        assert_eq!(response.attr("id"), Some("9"));
        assert_eq!(
            response.error,
            Some(ResponseError {
                code: 205,
                message: "Breakpoint 9 not found".to_string()
            })
        );
    }

    #[test]
    fn test_base64_text_is_decoded() {
        let packet = Packet::parse(
            r#"<response command="property_get" transaction_id="1"><property name="x" fullname="x" type="string" size="2" encoding="base64">aGk=</property></response>"#,
        )
        .unwrap();
        let Packet::Response(response) = packet else {
            panic!("expected a response");
        };
        let property = response.element.child("property").unwrap();
        assert_eq!(property.text.as_deref(), Some("hi"));
        assert_eq!(property.attr("type"), Some("string"));
    }

    #[test]
    fn test_typemap_skips_namespaced_attributes() {
        let packet = Packet::parse(
            r#"<response command="typemap_get" transaction_id="1" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema"><map name="integer" type="int" xsi:type="xsd:long"/></response>"#,
        )
        .unwrap();
        let Packet::Response(response) = packet else {
            panic!("expected a response");
        };
        assert_eq!(response.element.child("map").unwrap().attr("type"), Some("int"));
    }

    #[test]
    fn test_stream_and_json() {
        let packet = Packet::parse(r#"<stream type="stdout" encoding="base64">aGVsbG8=</stream>"#).unwrap();
        assert_eq!(
            packet,
            Packet::Stream(StreamPacket {
                stream: "stdout".to_string(),
                data: "hello".to_string()
            })
        );
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["kind"], "stream");
        assert_eq!(json["data"], "hello");
    }

    #[test]
    fn test_invalid_xml() {
        assert!(matches!(Packet::parse("<response"), Err(Error::Protocol(_))));
    }
}
