//! Human-readable rendering of engine packets

use std::fmt::Write as _;

use colored::Colorize;

use crate::client::{Element, InitPacket, Response, StreamPacket};

/// Attributes already shown in the response header line
const HEADER_ATTRIBUTES: &[&str] = &["command", "transaction_id", "status", "reason", "encoding"];

pub fn init(init: &InitPacket) -> String {
    format!(
        "Engine connected: {} {} (thread {})\n  file: {}\n  protocol: {}",
        init.appid.bold(),
        init.language,
        init.thread,
        init.fileuri,
        init.protocol_version
    )
}

pub fn stream(stream: &StreamPacket) -> String {
    let label = format!("[{}]", stream.stream);
    let mut out = String::new();
    for line in stream.data.lines() {
        let _ = writeln!(out, "{} {}", label.dimmed(), line);
    }
    out.trim_end().to_string()
}

pub fn response(response: &Response) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} [{}]", response.command.bold(), response.transaction_id);

    if let Some(error) = &response.error {
        let _ = write!(
            out,
            " {}",
            format!("error {}: {}", error.code, error.message).red()
        );
        return out;
    }

    if let Some(status) = response.status() {
        let _ = write!(out, " status={}", status.green());
    }
    if let Some(reason) = response.reason() {
        let _ = write!(out, " reason={}", reason);
    }
    for (name, value) in &response.element.attributes {
        if !HEADER_ATTRIBUTES.contains(&name.as_str()) {
            let _ = write!(out, " {}={}", name, value);
        }
    }

    for child in &response.element.children {
        match child.name.as_str() {
            "property" => property(&mut out, child, 1),
            "stack" => frame(&mut out, child),
            _ => element(&mut out, child, 1),
        }
    }

    if let Some(text) = response.text() {
        for line in text.lines() {
            let _ = write!(out, "\n  {}", line);
        }
    }
    out
}

fn frame(out: &mut String, stack: &Element) {
    let level = stack.attr("level").unwrap_or("?");
    let location = stack.attr("where").unwrap_or("");
    let file = stack.attr("filename").unwrap_or("");
    let line = stack.attr("lineno").unwrap_or("?");
    let _ = write!(
        out,
        "\n  #{} {} at {}:{}",
        level,
        location.cyan(),
        file,
        line
    );
}

fn property(out: &mut String, prop: &Element, indent: usize) {
    let pad = "  ".repeat(indent);
    let name = prop
        .attr("name")
        .or_else(|| prop.attr("fullname"))
        .unwrap_or("?");
    let kind = prop.attr("type").unwrap_or("undefined");
    let _ = write!(out, "\n{}{} ({})", pad, name.cyan(), kind);

    if let Some(class) = prop.attr("classname") {
        let _ = write!(out, " {}", class);
    }
    if let Some(text) = &prop.text {
        let _ = write!(out, " = {:?}", text);
    }
    if prop.attr("children") == Some("1") {
        if let Some(count) = prop.attr("numchildren") {
            let _ = write!(out, " [{} children]", count);
        }
    }
    if let Some(facet) = prop.attr("facet").filter(|f| !f.is_empty()) {
        let _ = write!(out, " {}", facet.dimmed());
    }

    for child in prop.children_named("property") {
        property(out, child, indent + 1);
    }
}

/// A packet of a kind the client does not know
pub fn other(el: &Element) -> String {
    let mut out = String::new();
    element(&mut out, el, 0);
    out.trim_start().dimmed().to_string()
}

fn element(out: &mut String, el: &Element, indent: usize) {
    let pad = "  ".repeat(indent);
    let _ = write!(out, "\n{}{}", pad, el.name);
    for (name, value) in &el.attributes {
        let _ = write!(out, " {}={}", name, value);
    }
    if let Some(text) = &el.text {
        let _ = write!(out, " {:?}", text);
    }
    for child in &el.children {
        element(out, child, indent + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Packet;

    fn parse_response(xml: &str) -> Response {
        match Packet::parse(xml).unwrap() {
            Packet::Response(response) => response,
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_unknown_packet() {
        colored::control::set_override(false);
        let Packet::Other(el) = Packet::parse(r#"<notify name="x"><a/></notify>"#).unwrap() else {
            panic!("expected an unknown packet");
        };
        assert_eq!(other(&el), "notify name=x\n  a");
    }

    #[test]
    fn test_error_response() {
        colored::control::set_override(false);
        let text = response(&parse_response(
            r#"<response command="breakpoint_get" transaction_id="4"><error code="205"><message>Breakpoint 9 not found</message></error></response>"#,
        ));
        assert_eq!(text, "breakpoint_get [4] error 205: Breakpoint 9 not found");
    }

    #[test]
    fn test_stack_response() {
        colored::control::set_override(false);
        let text = response(&parse_response(
            r#"<response command="stack_get" transaction_id="2"><stack level="0" type="file" filename="file:///a.ahk" lineno="10" where="auto-execute"/></response>"#,
        ));
        assert!(text.contains("#0 auto-execute at file:///a.ahk:10"));
    }

    #[test]
    fn test_property_tree() {
        colored::control::set_override(false);
        let text = response(&parse_response(
            r#"<response command="property_get" transaction_id="3"><property name="obj" fullname="obj" type="object" classname="Object" children="1" numchildren="1"><property name="a" fullname="obj.a" type="integer" encoding="base64">MQ==</property></property></response>"#,
        ));
        assert!(text.contains("obj (object) Object [1 children]"));
        assert!(text.contains("    a (integer) = \"1\""));
    }

    #[test]
    fn test_status_line() {
        colored::control::set_override(false);
        let text = response(&parse_response(
            r#"<response command="run" transaction_id="5" status="break" reason="ok"/>"#,
        ));
        assert_eq!(text, "run [5] status=break reason=ok");
    }
}
