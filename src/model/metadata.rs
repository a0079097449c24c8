//! `$metadata` document
//!
//! EDM generation belongs to the host; the server only calls through
//! [`MetadataWriter`]. [`EdmxWriter`] is a minimal CSDL 4.0 rendering used
//! when the host does not supply its own.

use std::fmt::Write;

use super::types::Model;

/// Renders the `$metadata` document for a model
pub trait MetadataWriter: Send + Sync {
    fn write(&self, model: &Model) -> String;
}

/// Plain CSDL 4.0 EDMX writer
#[derive(Debug, Clone, Copy, Default)]
pub struct EdmxWriter;

impl MetadataWriter for EdmxWriter {
    fn write(&self, model: &Model) -> String {
        let ns = escape(&model.namespace);
        let mut out = String::with_capacity(1024);

        out.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        out.push_str(r#"<edmx:Edmx xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx" Version="4.0">"#);
        out.push_str("<edmx:DataServices>");
        let _ = write!(
            out,
            r#"<Schema xmlns="http://docs.oasis-open.org/odata/ns/edm" Namespace="{}">"#,
            ns
        );

        for (type_name, props) in &model.entity_types {
            let _ = write!(out, r#"<EntityType Name="{}">"#, escape(type_name));

            let keys: Vec<&String> = props
                .iter()
                .filter(|(_, p)| p.key)
                .map(|(name, _)| name)
                .collect();
            if !keys.is_empty() {
                out.push_str("<Key>");
                for key in keys {
                    let _ = write!(out, r#"<PropertyRef Name="{}"/>"#, escape(key));
                }
                out.push_str("</Key>");
            }

            for (name, prop) in props {
                let _ = write!(
                    out,
                    r#"<Property Name="{}" Type="{}"/>"#,
                    escape(name),
                    escape(&prop.edm_type)
                );
            }
            out.push_str("</EntityType>");
        }

        out.push_str(r#"<EntityContainer Name="Context">"#);
        for (set_name, set) in &model.entity_sets {
            let _ = write!(
                out,
                r#"<EntitySet Name="{}" EntityType="{}"/>"#,
                escape(set_name),
                escape(&qualify(&model.namespace, &set.entity_type))
            );
        }
        out.push_str("</EntityContainer>");

        out.push_str("</Schema></edmx:DataServices></edmx:Edmx>");
        out
    }
}

fn qualify(namespace: &str, type_name: &str) -> String {
    if type_name.starts_with(&format!("{}.", namespace)) {
        type_name.to_string()
    } else {
        format!("{}.{}", namespace, type_name)
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyDef;

    #[test]
    fn test_edmx_contains_types_and_sets() {
        let model = Model::new("shop")
            .entity_type(
                "Widget",
                [
                    ("_id", PropertyDef::key("Edm.String")),
                    ("blob", PropertyDef::new("Edm.Binary")),
                ],
            )
            .entity_set("Widgets", "Widget");

        let xml = EdmxWriter.write(&model);

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"Namespace="shop""#));
        assert!(xml.contains(r#"<PropertyRef Name="_id"/>"#));
        assert!(xml.contains(r#"<Property Name="blob" Type="Edm.Binary"/>"#));
        assert!(xml.contains(r#"<EntitySet Name="Widgets" EntityType="shop.Widget"/>"#));
    }
}
