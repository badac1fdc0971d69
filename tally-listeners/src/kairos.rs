use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tally_metrics::{Event, EventValue, Tags};

use crate::sink::{Sink, SinkError};

/// Path of the KairosDB datapoint ingestion endpoint.
const DATAPOINTS_PATH: &str = "/api/v1/datapoints";

/// A metric with its datapoints in the KairosDB ingestion format.
#[derive(Debug, Serialize)]
struct Metric<'a> {
    name: &'a str,
    datapoints: Vec<(u64, EventValue)>,
    tags: &'a Tags,
}

/// Groups events by name and tags, in order of first appearance.
fn payload(events: &[Event]) -> Vec<Metric<'_>> {
    let mut metrics = Vec::<Metric<'_>>::new();
    let mut positions = HashMap::new();

    for event in events {
        let position = *positions
            .entry((event.name.as_str(), &event.tags))
            .or_insert_with(|| {
                metrics.push(Metric {
                    name: &event.name,
                    datapoints: Vec::new(),
                    tags: &event.tags,
                });
                metrics.len() - 1
            });

        metrics[position]
            .datapoints
            .push((event.timestamp, event.value));
    }

    metrics
}

/// Posts events to a KairosDB server.
///
/// Every batch becomes a single request. The server must answer with `204 No Content`, any other
/// status fails the batch.
pub struct KairosSink {
    client: Client,
    endpoint: String,
}

impl KairosSink {
    /// Creates a sink for the KairosDB server at `url`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}{DATAPOINTS_PATH}", url.trim_end_matches('/'));
        Ok(Self { client, endpoint })
    }

    /// Returns the URL batches are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Sink for KairosSink {
    fn name(&self) -> &'static str {
        "kairos"
    }

    fn deliver(&mut self, events: &[Event]) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&payload(events))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        Err(SinkError::Status {
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        })
    }
}

impl fmt::Debug for KairosSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KairosSink")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tally_metrics::{EventType, tags};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn events() -> Vec<Event> {
        vec![
            Event::new(
                "orders",
                tags!("host" => "web1"),
                1000,
                1,
                EventType::Counter,
            ),
            Event::new(
                "latency",
                Tags::new(),
                1000,
                EventValue::Float(2.5),
                EventType::Timer,
            ),
            Event::new(
                "orders",
                tags!("host" => "web1"),
                2000,
                2,
                EventType::Counter,
            ),
            Event::new(
                "orders",
                tags!("host" => "web2"),
                2000,
                5,
                EventType::Counter,
            ),
        ]
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    fn mock_server(runtime: &tokio::runtime::Runtime, response: ResponseTemplate) -> MockServer {
        runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path(DATAPOINTS_PATH))
                .and(header("content-type", "application/json"))
                .respond_with(response)
                .mount(&server)
                .await;
            server
        })
    }

    #[test]
    fn test_endpoint() {
        let sink = KairosSink::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(sink.endpoint(), "http://localhost:8080/api/v1/datapoints");
    }

    #[test]
    fn test_payload_groups_series() {
        let events = events();
        insta::assert_json_snapshot!(payload(&events), @r###"
        [
          {
            "name": "orders",
            "datapoints": [
              [
                1000,
                1
              ],
              [
                2000,
                2
              ]
            ],
            "tags": {
              "host": "web1"
            }
          },
          {
            "name": "latency",
            "datapoints": [
              [
                1000,
                2.5
              ]
            ],
            "tags": {}
          },
          {
            "name": "orders",
            "datapoints": [
              [
                2000,
                5
              ]
            ],
            "tags": {
              "host": "web2"
            }
          }
        ]
        "###);
    }

    #[test]
    fn test_posts_batch() {
        tally_test::setup();

        let runtime = runtime();
        let server = mock_server(&runtime, ResponseTemplate::new(204));

        let mut sink = KairosSink::new(&server.uri(), Duration::from_secs(5)).unwrap();
        sink.deliver(&events()).unwrap();

        let requests = runtime.block_on(server.received_requests()).unwrap();
        assert_eq!(requests.len(), 1);

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body.as_array().map(Vec::len), Some(3));
        assert_eq!(body[0]["name"], "orders");
        assert_eq!(body[0]["datapoints"][1][1], 2);
    }

    #[test]
    fn test_rejected_status() {
        tally_test::setup();

        let runtime = runtime();
        let server = mock_server(
            &runtime,
            ResponseTemplate::new(400).set_body_string("{\"errors\":[\"bad datapoint\"]}"),
        );

        let mut sink = KairosSink::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let error = sink.deliver(&events()).unwrap_err();

        match error {
            SinkError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "{\"errors\":[\"bad datapoint\"]}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
