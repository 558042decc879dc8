use petri_viewer::gateway::listing::{parse_page, runs_from_blobs, tests_from_blobs};
use petri_viewer::gateway::TestStatus;

const RUNS_PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://example.blob.core.windows.net/" ContainerName="results">
  <Prefix>runs/</Prefix>
  <Blobs>
    <Blob>
      <Name>runs/1001</Name>
      <Properties>
        <Creation-Time>Mon, 01 Jan 2024 10:00:00 GMT</Creation-Time>
        <Last-Modified>Mon, 01 Jan 2024 11:00:00 GMT</Last-Modified>
        <Etag>0x8DC0000000000001</Etag>
        <Content-Length>0</Content-Length>
        <Content-Type>application/octet-stream</Content-Type>
      </Properties>
      <Metadata>
        <petrifailed>2</petrifailed>
        <petripassed>118</petripassed>
        <ghbranch>main</ghbranch>
      </Metadata>
    </Blob>
    <Blob>
      <Name>runs/1002</Name>
      <Properties>
        <Creation-Time>Tue, 02 Jan 2024 10:00:00 GMT</Creation-Time>
      </Properties>
      <Metadata>
        <petrifailed>0</petrifailed>
        <petripassed>120</petripassed>
        <ghbranch>user/feature</ghbranch>
        <ghpr>4242</ghpr>
      </Metadata>
    </Blob>
  </Blobs>
  <NextMarker>2!88!MDAwMDIw</NextMarker>
</EnumerationResults>"#;

const LAST_PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="results">
  <Blobs>
    <Blob>
      <Name>runs/1003</Name>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;

const RUN_PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="results">
  <Blobs>
    <Blob><Name>1001/x86_64/boot_linux/petri.jsonl</Name></Blob>
    <Blob><Name>1001/x86_64/boot_linux/petri.passed</Name></Blob>
    <Blob><Name>1001/x86_64/boot_linux/screenshot.png</Name></Blob>
    <Blob><Name>1001/aarch64/boot_windows/petri.jsonl</Name></Blob>
    <Blob><Name>1001/aarch64/still_running/serial.log</Name></Blob>
    <Blob><Name>1001/summary.json</Name></Blob>
  </Blobs>
</EnumerationResults>"#;

#[test]
fn test_parse_page_with_continuation() {
    let page = parse_page(RUNS_PAGE).expect("listing should parse");
    assert_eq!(page.blobs.len(), 2);
    assert_eq!(page.blobs[0].name, "runs/1001");
    assert_eq!(page.next_marker.as_deref(), Some("2!88!MDAwMDIw"));
    assert_eq!(
        page.blobs[0].properties.etag.as_deref(),
        Some("0x8DC0000000000001")
    );
}

#[test]
fn test_empty_next_marker_ends_listing() {
    let page = parse_page(LAST_PAGE).unwrap();
    assert_eq!(page.blobs.len(), 1);
    assert!(page.next_marker.is_none());
}

#[test]
fn test_runs_from_blobs() {
    let page = parse_page(RUNS_PAGE).unwrap();
    let runs = runs_from_blobs(&page.blobs);

    assert_eq!(runs.len(), 2);
    // Newest first
    assert_eq!(runs[0].id, "1002");
    assert_eq!(runs[0].branch, "user/feature");
    assert_eq!(runs[0].pr_number, Some(4242));
    assert_eq!((runs[0].passed, runs[0].failed), (120, 0));

    assert_eq!(runs[1].id, "1001");
    assert_eq!(runs[1].failed, 2);
    assert!(runs[1].has_failures());
    assert_eq!(runs[1].pr_number, None);
}

#[test]
fn test_missing_metadata_defaults_to_empty() {
    let page = parse_page(LAST_PAGE).unwrap();
    let runs = runs_from_blobs(&page.blobs);

    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.id, "1003");
    assert_eq!(run.branch, "");
    assert_eq!((run.passed, run.failed), (0, 0));
    assert_eq!(run.creation_time.timestamp(), 0);
}

#[test]
fn test_duplicate_run_blobs_are_merged() {
    let mut blobs = parse_page(RUNS_PAGE).unwrap().blobs;
    blobs.extend(parse_page(RUNS_PAGE).unwrap().blobs);
    assert_eq!(runs_from_blobs(&blobs).len(), 2);
}

#[test]
fn test_tests_from_blobs() {
    let page = parse_page(RUN_PAGE).unwrap();
    let tests = tests_from_blobs("1001", &page.blobs);

    // Folders without petri.jsonl are not completed results
    assert_eq!(tests.len(), 2);

    let boot_linux = tests.iter().find(|t| t.name == "x86_64/boot_linux").unwrap();
    assert_eq!(boot_linux.status, TestStatus::Passed);
    assert_eq!(boot_linux.path, "1001/x86_64/boot_linux");
    assert_eq!(boot_linux.architecture(), "x86_64");

    let boot_windows = tests
        .iter()
        .find(|t| t.name == "aarch64/boot_windows")
        .unwrap();
    assert_eq!(boot_windows.status, TestStatus::Failed);
}

#[test]
fn test_pass_marker_without_log_is_unknown() {
    let page = parse_page(
        r"<EnumerationResults><Blobs>
<Blob><Name>7/x86_64/boot/petri.passed</Name></Blob>
<Blob><Name>7/x86_64/boot/screenshot.png</Name></Blob>
</Blobs></EnumerationResults>",
    )
    .unwrap();
    let tests = tests_from_blobs("7", &page.blobs);

    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].name, "x86_64/boot");
    assert_eq!(tests[0].status, TestStatus::Unknown);
}

#[test]
fn test_tests_from_blobs_ignores_other_runs() {
    let page = parse_page(RUN_PAGE).unwrap();
    assert!(tests_from_blobs("1002", &page.blobs).is_empty());
}

#[test]
fn test_malformed_xml_is_an_error() {
    assert!(parse_page("<EnumerationResults><Blobs><Blob>").is_err());
}
