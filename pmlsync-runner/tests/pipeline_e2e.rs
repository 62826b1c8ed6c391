//! End-to-end pipeline runs against a scripted portal and an in-memory sink.

use pmlsync_core::artifact::ConsistencyError;
use pmlsync_core::domain::Subsystem;
use pmlsync_core::portal::{PortalResponse, PortalTransport, ProtocolError, RequestBody};
use pmlsync_core::publish::{BatchError, IngestRecord, IngestSink};
use pmlsync_runner::{clean, process_existing, run_pipeline, PipelineConfig, PipelineError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;

// ── Doubles ──────────────────────────────────────────────────────────

const PAGE: &str = r#"<form>
    <input type="hidden" name="__VIEWSTATE" value="page-token" />
    <input name="ctl00$ContentPlaceHolder1$txtPeriodo" value="02/05/2024 - 02/05/2024" />
    <input type="hidden" name="ctl00$ContentPlaceHolder1$hdfStartDateSelected" value="02/05/2024" />
    </form>"#;

struct ScriptedPortal {
    responses: RefCell<VecDeque<PortalResponse>>,
}

impl ScriptedPortal {
    fn new(responses: Vec<PortalResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
        }
    }
}

impl PortalTransport for ScriptedPortal {
    fn fetch_page(&self) -> Result<String, ProtocolError> {
        Ok(PAGE.to_string())
    }

    fn submit(&self, _body: &RequestBody) -> Result<PortalResponse, ProtocolError> {
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ProtocolError::Request("script exhausted".into()))
    }
}

/// Collects batches; answers HTTP 500 for the batch numbers in `fail`.
#[derive(Default)]
struct MemorySink {
    fail: Vec<usize>,
    batches: RefCell<Vec<Vec<IngestRecord>>>,
}

impl IngestSink for MemorySink {
    fn send(&self, batch: &[IngestRecord]) -> Result<(), BatchError> {
        let mut batches = self.batches.borrow_mut();
        batches.push(batch.to_vec());
        if self.fail.contains(&batches.len()) {
            return Err(BatchError::Status {
                code: 500,
                reason: "Internal Server Error".into(),
                body: "{\"error\": \"insert failed\"}".into(),
            });
        }
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

fn report(subsystem: Subsystem) -> String {
    let mut text = format!(
        "\"Precios Marginales Locales\"\n\"Sistema: {subsystem}\"\n\"Fecha: 02/may/2024\"\n\n"
    );
    text.push_str("Hora,Clave del nodo,Precio marginal local ($/MWh),Componente de energia ($/MWh),Componente de perdidas ($/MWh),Componente de congestion ($/MWh)\n");
    for node in 0..10 {
        for hour in 1..=24 {
            text.push_str(&format!("{hour},{subsystem}-{node:02},1010.5,1000,10,0.5\n"));
        }
    }
    text
}

fn partial(token: &str) -> PortalResponse {
    PortalResponse {
        status: 200,
        content_disposition: None,
        body: format!("0|hiddenField|__VIEWSTATE|{token}|").into_bytes(),
    }
}

fn zip_export(subsystem: Subsystem, content: &str) -> PortalResponse {
    let name = format!("PML_{subsystem}_MDA");
    let mut zw = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zw.start_file(format!("{name}.csv"), SimpleFileOptions::default())
        .unwrap();
    zw.write_all(content.as_bytes()).unwrap();
    PortalResponse {
        status: 200,
        content_disposition: Some(format!("attachment; filename=\"{name}.zip\"")),
        body: zw.finish().unwrap().into_inner(),
    }
}

fn exchange(subsystem: Subsystem, last: PortalResponse) -> Vec<PortalResponse> {
    vec![
        partial(&format!("{subsystem}-1")),
        partial(&format!("{subsystem}-2")),
        last,
    ]
}

fn full_script() -> Vec<PortalResponse> {
    Subsystem::ALL
        .iter()
        .flat_map(|&s| exchange(s, zip_export(s, &report(s))))
        .collect()
}

fn config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.artifacts.working_dir = dir.to_path_buf();
    config
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn full_run_publishes_720_rows_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.artifacts.keep_artifacts = false;
    config.artifacts.combined_csv = Some(dir.path().join("combined.csv"));

    let portal = ScriptedPortal::new(full_script());
    let sink = MemorySink::default();
    let report = run_pipeline(&config, &portal, &sink).unwrap();

    assert!(report.succeeded());
    assert!(report.export.as_ref().unwrap().all_succeeded());
    assert_eq!(report.publish.total_records, 720);
    assert_eq!(report.publish.records_sent, 720);

    let sizes: Vec<usize> = sink.batches.borrow().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![100, 100, 100, 100, 100, 100, 100, 20]);
    let first = &sink.batches.borrow()[0][0];
    assert_eq!(first.sistema, Subsystem::Sin);
    assert_eq!(first.fecha, "2024-05-02");
    assert_eq!(first.hora, "01:00:00");
    assert_eq!(sink.batches.borrow()[7][19].hora, "00:00:00");

    let combined = std::fs::read_to_string(dir.path().join("combined.csv")).unwrap();
    assert_eq!(combined.lines().count(), 721);
    assert_eq!(report.removed_artifacts.len(), 3);
    for s in Subsystem::ALL {
        assert!(!dir.path().join(format!("PML_MDA_{s}.csv")).exists());
    }
}

#[test]
fn failed_batch_makes_the_run_fail_but_sends_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.artifacts.keep_artifacts = false;
    config.artifacts.combined_csv = Some(dir.path().join("combined.csv"));

    let portal = ScriptedPortal::new(full_script());
    let sink = MemorySink {
        fail: vec![5],
        ..Default::default()
    };
    let report = run_pipeline(&config, &portal, &sink).unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.publish.batches.len(), 8);
    assert_eq!(report.publish.records_sent, 620);
    assert_eq!(sink.batches.borrow().len(), 8);
    // Nothing is cleaned up or saved after a partial publish.
    assert!(report.removed_artifacts.is_empty());
    assert!(report.combined_csv.is_none());
    assert!(!dir.path().join("combined.csv").exists());
    assert!(dir.path().join("PML_MDA_BCA.csv").exists());
}

#[test]
fn missing_subsystem_blocks_publish() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let mut script = exchange(Subsystem::Sin, zip_export(Subsystem::Sin, &report(Subsystem::Sin)));
    script.extend(exchange(
        Subsystem::Bca,
        PortalResponse {
            status: 200,
            content_disposition: None,
            body: b"<html>Error</html>".to_vec(),
        },
    ));
    script.extend(exchange(Subsystem::Bcs, zip_export(Subsystem::Bcs, &report(Subsystem::Bcs))));
    let portal = ScriptedPortal::new(script);
    let sink = MemorySink::default();

    let err = run_pipeline(&config, &portal, &sink).unwrap_err();
    match err {
        PipelineError::Consistency(ConsistencyError::MissingArtifact { path }) => {
            assert_eq!(path, dir.path().join("PML_MDA_BCA.csv"));
        }
        other => panic!("expected MissingArtifact, got {other}"),
    }
    assert!(sink.batches.borrow().is_empty());
}

#[test]
fn cached_duplicate_response_blocks_publish() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    // The portal hands BCS the same file it gave BCA.
    let bca = report(Subsystem::Bca);
    let mut script = exchange(Subsystem::Sin, zip_export(Subsystem::Sin, &report(Subsystem::Sin)));
    script.extend(exchange(Subsystem::Bca, zip_export(Subsystem::Bca, &bca)));
    script.extend(exchange(Subsystem::Bcs, zip_export(Subsystem::Bcs, &bca)));
    let portal = ScriptedPortal::new(script);
    let sink = MemorySink::default();

    let err = run_pipeline(&config, &portal, &sink).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Consistency(ConsistencyError::IdenticalArtifacts {
            first: Subsystem::Bca,
            second: Subsystem::Bcs
        })
    ));
    assert!(sink.batches.borrow().is_empty());
}

#[test]
fn process_existing_uses_artifacts_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    for s in Subsystem::ALL {
        std::fs::write(dir.path().join(format!("PML_MDA_{s}.csv")), report(s)).unwrap();
    }
    let mut config = config(dir.path());
    config.ingest.batch_size = 500;

    let sink = MemorySink::default();
    let report = process_existing(&config, &sink).unwrap();
    assert!(report.succeeded());
    assert!(report.export.is_none());
    assert_eq!(sink.batches.borrow().len(), 2);
    // Kept by default.
    assert!(dir.path().join("PML_MDA_SIN.csv").exists());
}

#[test]
fn clean_removes_only_prefixed_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    for s in Subsystem::ALL {
        std::fs::write(dir.path().join(format!("PML_MDA_{s}.csv")), "x").unwrap();
    }
    std::fs::write(dir.path().join("other.csv"), "keep").unwrap();

    let removed = clean(&config(dir.path())).unwrap();
    assert_eq!(removed.len(), 3);
    assert!(dir.path().join("other.csv").exists());
}
