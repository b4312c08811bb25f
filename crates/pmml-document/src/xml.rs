//! Model-document XML → typed, bound structure.
//!
//! Two passes, per design note §9 ("separate the schema validation pass
//! from the evaluation pass"): `parse_tree` tokenizes with `quick-xml` into
//! a generic, schema-agnostic [`XmlElement`] tree (pure syntax); `bind`
//! (in `crate::bind`) walks that tree into the typed [`crate::model::ModelDocument`]
//! (pure semantics, no further schema work once it returns).

use pmml_common::ModelError;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|s| s.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// The first child whose tag is one of `names`, used where a choice
    /// group stands in for a sum-typed expression or predicate.
    pub fn first_child_in(&self, names: &[&str]) -> Option<&XmlElement> {
        self.children.iter().find(|c| names.contains(&c.name.as_str()))
    }
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

/// Parses the whole document into a generic element tree rooted at the
/// document element (`PMML`, `AugustusConfiguration`, or any other root —
/// the caller decides what to do with the tag).
pub fn parse_tree(xml: &str) -> Result<XmlElement, ModelError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let mut elem = XmlElement {
                    name: local_name(e.name().as_ref()),
                    ..Default::default()
                };
                for attr in e.attributes().flatten() {
                    let key = local_name(attr.key.as_ref());
                    let value = attr
                        .unescape_value()
                        .map_err(|err| ModelError::schema(format!("bad attribute: {err}")))?
                        .into_owned();
                    elem.attrs.insert(key, value);
                }
                stack.push(elem);
            }
            Ok(Event::Empty(e)) => {
                let mut elem = XmlElement {
                    name: local_name(e.name().as_ref()),
                    ..Default::default()
                };
                for attr in e.attributes().flatten() {
                    let key = local_name(attr.key.as_ref());
                    let value = attr
                        .unescape_value()
                        .map_err(|err| ModelError::schema(format!("bad attribute: {err}")))?
                        .into_owned();
                    elem.attrs.insert(key, value);
                }
                push_completed(&mut stack, &mut root, elem);
            }
            Ok(Event::End(_)) => {
                let elem = stack
                    .pop()
                    .ok_or_else(|| ModelError::schema("unbalanced closing tag"))?;
                push_completed(&mut stack, &mut root, elem);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|err| ModelError::schema(format!("bad text: {err}")))?
                    .into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(ModelError::schema(format!("XML parse error: {err}"))),
        }
        buf.clear();
    }

    root.ok_or_else(|| ModelError::schema("empty document"))
}

fn push_completed(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, elem: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(elem),
        None => *root = Some(elem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attrs() {
        let xml = r#"<PMML version="4.4"><DataDictionary><DataField name="x" optype="continuous" dataType="double"/></DataDictionary></PMML>"#;
        let root = parse_tree(xml).unwrap();
        assert_eq!(root.name, "PMML");
        assert_eq!(root.attr("version"), Some("4.4"));
        let dd = root.child("DataDictionary").unwrap();
        let df = dd.child("DataField").unwrap();
        assert_eq!(df.attr("name"), Some("x"));
    }

    #[test]
    fn captures_element_text() {
        let xml = "<Constant>42</Constant>";
        let root = parse_tree(xml).unwrap();
        assert_eq!(root.text, "42");
    }
}
