use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use engine::events::EngineEvent;
use engine::processor::ProcessorSettings;
use engine::request::{DepartureRequest, Request, StopValue};
use engine::{Engine, EngineContext};
use model::filter::{
    Constraint, ConstraintType, ConstraintValue, ConstraintVariant, Filter, FilterAction,
    FilterList, FilterSettings,
};
use model::vehicle::VehicleType;
use scripting::error::ScriptErrorKind;
use tokio::sync::mpsc;

const TIMETABLE_SCRIPT: &str = r#"
fn getTimetable(values) {
    let rows = "08:05|S1|InterurbanTrain|North;08:10|S2|Tram|South;08:15|N1|Bus|North-City";
    for row in rows.split(";") {
        let columns = row.split("|");
        result.addData(#{
            DepartureTime: helper.matchTime(columns[0], "hh:mm"),
            TransportLine: columns[1],
            TypeOfVehicle: columns[2],
            Target: columns[3]
        });
    }
}
"#;

// burns a little scripted time so the job is observably in flight
const SLOW_TIMETABLE_SCRIPT: &str = r#"
fn getTimetable(values) {
    let x = 0;
    for i in 0..300000 {
        x += i;
    }
    result.addData(#{
        DepartureTime: helper.matchTime("08:05", "hh:mm"),
        TransportLine: "S1",
        TypeOfVehicle: "Bus",
        Target: "North"
    });
}
"#;

fn write_provider(dir: &PathBuf, id: &str, script: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(format!("{}.rhai", id)), script).unwrap();
    fs::write(
        dir.join(format!("{}.xml", id)),
        format!(
            r#"<serviceProvider>
    <fileVersion>1.1</fileVersion>
    <name lang="en">Test Provider</name>
    <author>Test Author</author>
    <url>https://example.com/timetable</url>
    <defaultVehicleType>Bus</defaultVehicleType>
    <script>{}.rhai</script>
    <sampleStop>Main</sampleStop>
</serviceProvider>"#,
            id
        ),
    )
    .unwrap();
}

fn engine_with_provider(name: &str, script: &str) -> (Engine, mpsc::Receiver<EngineEvent>) {
    let dir = std::env::temp_dir().join(format!("engine-test-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    let providers = dir.join("providers");
    write_provider(&providers, "test_provider", script);
    Engine::new(EngineContext::new(providers, dir.join("cache")))
}

async fn next_event(receiver: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(20), receiver.recv())
        .await
        .expect("timed out waiting for an engine event")
        .expect("engine event channel closed")
}

fn departure_request(source: &str) -> Request {
    Request::Departures(DepartureRequest {
        source_name: source.to_owned(),
        stop: StopValue::by_name("Main"),
        datetime: Local::now(),
        max_count: 3,
        city: None,
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn departures_are_fetched_normalized_and_processed() {
    let (engine, mut events) = engine_with_provider("departures", TIMETABLE_SCRIPT);
    engine
        .request("test_provider", departure_request("dep|A"))
        .await
        .unwrap();

    let mut ready_lines: Option<Vec<i32>> = None;
    let mut processed = None;
    while ready_lines.is_none() || processed.is_none() {
        match next_event(&mut events).await {
            EngineEvent::DeparturesReady(ready) => {
                assert_eq!(ready.source, "dep|A");
                assert_eq!(ready.records.len(), 3);
                assert!(!ready.could_need_forced_update);
                let today = Local::now().date_naive();
                for departure in &ready.records {
                    assert_eq!(departure.departure().date_naive(), today);
                    assert!(departure.matched_alarms().is_empty());
                }
                assert_eq!(ready.records[0].vehicle_type(), VehicleType::TrainInterurban);
                ready_lines =
                    Some(ready.records.iter().map(|r| r.line_number()).collect());
            }
            EngineEvent::DeparturesProcessed { departures, .. } => {
                processed = Some(departures.len());
            }
            EngineEvent::BeginDepartureProcessing { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(ready_lines.unwrap(), vec![1, 2, 1]);
    assert_eq!(processed.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn show_matching_filter_hides_other_vehicles() {
    let (engine, mut events) = engine_with_provider("filter", TIMETABLE_SCRIPT);
    engine.update_processor_settings(ProcessorSettings {
        filter_settings: vec![FilterSettings {
            name: "bus and tram only".to_owned(),
            action: FilterAction::ShowMatching,
            filters: FilterList::new(vec![Filter::new(vec![Constraint {
                kind: ConstraintType::ByVehicleType,
                variant: ConstraintVariant::IsOneOf,
                value: ConstraintValue::IntList(vec![
                    VehicleType::Bus.id(),
                    VehicleType::Tram.id(),
                ]),
            }])]),
            affected_stops: BTreeSet::new(),
        }],
        ..Default::default()
    });
    engine
        .request("test_provider", departure_request("dep|B"))
        .await
        .unwrap();

    loop {
        match next_event(&mut events).await {
            EngineEvent::DeparturesProcessed { departures, .. } => {
                assert_eq!(departures.len(), 3);
                // the interurban train is filtered out, tram and bus stay
                assert!(departures[0].filtered_out());
                assert!(!departures[1].filtered_out());
                assert!(!departures[2].filtered_out());
                break;
            }
            EngineEvent::ErrorParsing { message, .. } => panic!("job failed: {}", message),
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_entry_function_emits_error_parsing() {
    let (engine, mut events) = engine_with_provider("missing-entry", TIMETABLE_SCRIPT);
    let request = Request::Journeys(engine::request::JourneyRequest {
        source_name: "jou|A".to_owned(),
        origin_stop: StopValue::by_name("A"),
        target_stop: StopValue::by_name("B"),
        datetime: Local::now(),
        max_count: 2,
        city: None,
        url_to_use: None,
        round_trips: 0,
    });
    engine.request("test_provider", request).await.unwrap();
    match next_event(&mut events).await {
        EngineEvent::ErrorParsing { kind, request, .. } => {
            assert_eq!(kind, ScriptErrorKind::EntryMissing);
            assert_eq!(request.source_name(), "jou|A");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn plugin_with_no_records_reports_parse_failed() {
    let (engine, mut events) =
        engine_with_provider("empty", "fn getTimetable(values) {}\n");
    engine
        .request("test_provider", departure_request("dep|E"))
        .await
        .unwrap();
    match next_event(&mut events).await {
        EngineEvent::ErrorParsing { kind, .. } => {
            assert_eq!(kind, ScriptErrorKind::ParseFailed);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn one_job_per_source_at_a_time() {
    let (engine, mut events) = engine_with_provider("duplicate", SLOW_TIMETABLE_SCRIPT);
    engine
        .request("test_provider", departure_request("dep|D"))
        .await
        .unwrap();
    let second = engine
        .request("test_provider", departure_request("dep|D"))
        .await;
    assert!(matches!(
        second,
        Err(engine::EngineError::DuplicateSourceJob(source)) if source == "dep|D"
    ));
    // the running job still completes
    loop {
        if let EngineEvent::DeparturesReady(ready) = next_event(&mut events).await {
            assert_eq!(ready.records.len(), 1);
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn scripts_can_use_storage_between_jobs() {
    let script = r#"
fn getTimetable(values) {
    let calls = storage.readPersistent("calls", 0) + 1;
    storage.writePersistent("calls", calls, 1);
    result.addData(#{
        DepartureTime: helper.matchTime("08:05", "hh:mm"),
        TransportLine: "S" + calls,
        TypeOfVehicle: "Bus",
        Target: "Somewhere"
    });
}
"#;
    let (engine, mut events) = engine_with_provider("storage", script);
    engine
        .request("test_provider", departure_request("dep|S1"))
        .await
        .unwrap();
    loop {
        if let EngineEvent::DeparturesReady(ready) = next_event(&mut events).await {
            assert_eq!(ready.records[0].line_string(), "S1");
            break;
        }
    }
    engine
        .request("test_provider", departure_request("dep|S2"))
        .await
        .unwrap();
    loop {
        if let EngineEvent::DeparturesReady(ready) = next_event(&mut events).await {
            assert_eq!(ready.records[0].line_string(), "S2");
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_suggestions_are_normalized() {
    let script = r#"
fn getTimetable(values) {}
fn getStopSuggestions(values) {
    result.addData(#{ StopName: values.stop + " Hbf", StopID: "8000199", StopWeight: 12 });
    result.addData(#{ StopName: values.stop + " Süd" });
}
"#;
    let (engine, mut events) = engine_with_provider("suggestions", script);
    let request = Request::StopSuggestions(engine::request::StopSuggestionRequest {
        source_name: "sugg|K".to_owned(),
        stop: "Kiel".to_owned(),
        city: None,
        max_count: 10,
    });
    engine.request("test_provider", request).await.unwrap();
    loop {
        match next_event(&mut events).await {
            EngineEvent::StopSuggestionsReady(ready) => {
                assert_eq!(ready.records.len(), 2);
                assert_eq!(ready.records[0].stop_name, "Kiel Hbf");
                assert_eq!(ready.records[0].stop_id.as_deref(), Some("8000199"));
                assert_eq!(ready.records[0].stop_weight, Some(12));
                break;
            }
            EngineEvent::ErrorParsing { message, .. } => panic!("job failed: {}", message),
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_publish_sets_forced_update_hint() {
    // publish after the first record, then add more without publishing
    let script = r#"
fn getTimetable(values) {
    result.addData(#{
        DepartureTime: helper.matchTime("08:05", "hh:mm"),
        TransportLine: "1", TypeOfVehicle: "Bus", Target: "A"
    });
    result.publish();
    result.addData(#{
        DepartureTime: helper.matchTime("08:10", "hh:mm"),
        TransportLine: "2", TypeOfVehicle: "Bus", Target: "B"
    });
}
"#;
    let (engine, mut events) = engine_with_provider("publish", script);
    engine
        .request("test_provider", departure_request("dep|P"))
        .await
        .unwrap();
    let mut saw_partial = false;
    loop {
        if let EngineEvent::DeparturesReady(ready) = next_event(&mut events).await {
            if ready.records.len() == 1 {
                saw_partial = true;
                continue;
            }
            assert_eq!(ready.records.len(), 2);
            assert!(ready.could_need_forced_update);
            break;
        }
    }
    assert!(saw_partial, "expected an incremental publish event");
}
