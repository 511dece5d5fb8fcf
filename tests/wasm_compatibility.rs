#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use issuemap::upstream::parse_records;
    use issuemap::{MapSession, RecordFilter, SvgOptions, render_svg};
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_records_layout_and_render() {
        let input = r#"[
            { "id": "a", "title": "Launch", "team": { "id": "t", "name": "Core" } },
            { "id": "b", "title": "Ship it", "parent": { "id": "a" }, "team": { "id": "t", "name": "Core" } }
        ]"#;

        let records = parse_records(input).expect("Failed to parse records");
        let mut session = MapSession::from_records(records, RecordFilter::default());
        let svg = render_svg(session.render(), &SvgOptions::default()).expect("Failed to render SVG");

        assert!(svg.contains("<svg"));
        assert!(svg.contains("Core"));
        assert!(svg.contains("Launch"));
        assert!(svg.contains("Ship it"));
    }

    #[wasm_bindgen_test]
    fn test_local_edits() {
        let input = r#"[{ "id": "a", "title": "Launch", "team": { "id": "t", "name": "Core" } }]"#;

        let records = parse_records(input).expect("Failed to parse records");
        let mut session = MapSession::from_records(records, RecordFilter::default());
        session.render();
        session.toggle_collapse("a").expect("Failed to collapse");
        assert!(session.delete("team-t").is_err());
        assert!(session.delete("a").is_ok());
        assert_eq!(session.tree().count(), 1);
    }

    #[wasm_bindgen_test]
    fn test_empty_input() {
        let records = parse_records("[]").expect("Failed to parse empty records");
        let mut session = MapSession::from_records(records, RecordFilter::default());
        let svg = render_svg(session.render(), &SvgOptions::default()).expect("Failed to render empty map");

        assert!(svg.contains("<svg"));
        assert!(svg.contains("viewBox"));
    }
}
