//! GENA `propertyset` body parsing.

use xmltree::Element;

use crate::error::{CallbackError, Result};

/// Parse a NOTIFY body into `(variable, value)` pairs in document order.
///
/// An empty element such as `<Volume/>` is an empty value. `None` is left
/// for a variable whose content is markup rather than text.
///
/// ```
/// let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
///     <e:property><Volume>12</Volume></e:property>
/// </e:propertyset>"#;
/// let properties = callback_server::parse_property_set(body.as_bytes()).unwrap();
/// assert_eq!(properties, vec![("Volume".to_string(), Some("12".to_string()))]);
/// ```
pub fn parse_property_set(body: &[u8]) -> Result<Vec<(String, Option<String>)>> {
    let root = Element::parse(body).map_err(|e| CallbackError::Parse(e.to_string()))?;
    if root.name != "propertyset" {
        return Err(CallbackError::Parse(format!(
            "expected propertyset, found {}",
            root.name
        )));
    }

    let properties = root
        .children
        .iter()
        .filter_map(|node| node.as_element())
        .filter(|element| element.name == "property")
        .flat_map(|property| property.children.iter().filter_map(|node| node.as_element()))
        .map(|variable| {
            let value = match variable.get_text() {
                Some(text) => Some(text.into_owned()),
                None if variable.children.is_empty() => Some(String::new()),
                None => None,
            };
            (variable.name.clone(), value)
        })
        .collect();
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiple_properties() {
        let body = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
    <e:property>
        <TransportState>PLAYING</TransportState>
    </e:property>
    <e:property>
        <CurrentTrackURI>http://192.168.1.9/track.flac</CurrentTrackURI>
    </e:property>
</e:propertyset>"#;

        let properties = parse_property_set(body.as_bytes()).unwrap();

        assert_eq!(
            properties,
            vec![
                ("TransportState".to_string(), Some("PLAYING".to_string())),
                ("CurrentTrackURI".to_string(), Some("http://192.168.1.9/track.flac".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_empty_value() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
    <e:property><SystemUpdateID/></e:property>
</e:propertyset>"#;

        let properties = parse_property_set(body.as_bytes()).unwrap();

        assert_eq!(properties, vec![("SystemUpdateID".to_string(), Some(String::new()))]);
    }

    #[test]
    fn test_parse_cleared_values() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
    <e:property><CurrentTrackMetaData></CurrentTrackMetaData></e:property>
    <e:property><CurrentTrackURI/></e:property>
    <e:property><Nested><Inner>1</Inner></Nested></e:property>
</e:propertyset>"#;

        let properties = parse_property_set(body.as_bytes()).unwrap();

        assert_eq!(
            properties,
            vec![
                ("CurrentTrackMetaData".to_string(), Some(String::new())),
                ("CurrentTrackURI".to_string(), Some(String::new())),
                ("Nested".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_parse_escaped_last_change() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
    <e:property><LastChange>&lt;Event&gt;&lt;/Event&gt;</LastChange></e:property>
</e:propertyset>"#;

        let properties = parse_property_set(body.as_bytes()).unwrap();

        assert_eq!(properties[0].1.as_deref(), Some("<Event></Event>"));
    }

    #[test]
    fn test_parse_rejects_other_documents() {
        assert!(matches!(
            parse_property_set(b"<event>test</event>"),
            Err(CallbackError::Parse(_))
        ));
        assert!(matches!(parse_property_set(b"not xml"), Err(CallbackError::Parse(_))));
    }
}
