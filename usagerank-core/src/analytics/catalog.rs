//! Display names for known scene types.

/// Known scene ids and their display names.
pub const SCENE_NAMES: &[(&str, &str)] = &[
    ("xiaohongshu", "Xiaohongshu Note"),
    ("poster", "Poster"),
    ("long_post", "Long Post"),
    ("short_post", "Short Post"),
    ("article", "Article"),
    ("other", "Other"),
];

/// Catalog name for a scene id, if the id is known.
pub fn scene_name(scene_id: &str) -> Option<&'static str> {
    SCENE_NAMES
        .iter()
        .find(|(id, _)| *id == scene_id)
        .map(|(_, name)| *name)
}

/// Name to show for an entity: catalog name, then the source's own name,
/// then the id itself.
pub fn display_name(entity_id: &str, source_name: Option<&str>) -> String {
    scene_name(entity_id)
        .or(source_name)
        .unwrap_or(entity_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(display_name("poster", Some("ignored")), "Poster");
        assert_eq!(display_name("video", Some("Short Video")), "Short Video");
        assert_eq!(display_name("video", None), "video");
    }
}
