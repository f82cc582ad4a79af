use std::env;

use chrono::Local;
use engine::events::EngineEvent;
use engine::request::{DepartureRequest, Request, StopValue};
use engine::{Engine, EngineContext};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let provider_id = args.next().expect("expected a provider id as first argument");
    let stop = args.next().unwrap_or_else(|| "Kiel Hbf".to_owned());

    let providers_dir =
        env::var("PROVIDERS_DIR").unwrap_or_else(|_| "providers".to_owned());
    let cache_dir = env::var("CACHE_DIR").unwrap_or_else(|_| ".cache".to_owned());
    let (engine, mut events) = Engine::new(EngineContext::new(providers_dir, cache_dir));

    let request = Request::Departures(DepartureRequest {
        source_name: format!("Departures {} {}", provider_id, stop),
        stop: StopValue::by_name(stop),
        datetime: Local::now(),
        max_count: 20,
        city: None,
    });
    engine
        .request(&provider_id, request)
        .await
        .expect("could not enqueue the request");

    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::DeparturesReady(ready) => {
                println!("{} departures:", ready.records.len());
                for departure in &ready.records {
                    println!(
                        "  {} {:>6} -> {} ({:?}, delay {})",
                        departure.departure().format("%H:%M"),
                        departure.line_string(),
                        departure.target_display(),
                        departure.vehicle_type(),
                        departure.delay_minutes()
                    );
                }
                if !ready.could_need_forced_update {
                    break;
                }
            }
            EngineEvent::ErrorParsing { message, .. } => {
                eprintln!("request failed: {}", message);
                break;
            }
            _ => {}
        }
    }
}
