//! WLED controller over its JSON API

use super::{DeviceSink, SegmentCache, SinkCommand};
use crate::dispatch::wled_rules::EffectCommand;
use crate::error::DispatchError;
use crate::types::DeviceType;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Sends a state document to a controller
pub trait WledTransport: Send {
    fn post_state(&self, ip: &str, body: &Value) -> Result<(), DispatchError>;
}

/// HTTP transport posting to `http://<ip>/json/state`
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl WledTransport for UreqTransport {
    fn post_state(&self, ip: &str, body: &Value) -> Result<(), DispatchError> {
        let url = format!("http://{}/json/state", ip);
        match self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(body)
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(DispatchError::Http(format!("{} returned {}: {}", url, code, body)))
            }
            Err(ureq::Error::Transport(t)) => {
                let message = t.to_string();
                if message.contains("timed out") {
                    Err(DispatchError::Timeout(format!("{}: {}", url, message)))
                } else {
                    Err(DispatchError::Http(format!("{}: {}", url, message)))
                }
            }
        }
    }
}

/// State document for `command`, turning `stale` segments off
pub fn state_body(command: &EffectCommand, stale: &[u32]) -> Value {
    let off = |id: &u32| json!({ "id": id, "on": false, "bri": 0 });

    match command {
        EffectCommand::PowerOff { segments } => json!({
            "seg": segments.iter().map(off).collect::<Vec<_>>(),
        }),
        EffectCommand::Apply {
            segments,
            color,
            brightness,
            ..
        } => {
            let fx = command.effect_id().unwrap_or(0);
            let mut seg: Vec<Value> = segments
                .iter()
                .map(|id| {
                    json!({
                        "id": id,
                        "on": true,
                        "bri": brightness,
                        "fx": fx,
                        "col": [[color[0], color[1], color[2]]],
                    })
                })
                .collect();
            seg.extend(stale.iter().map(off));
            json!({ "on": true, "seg": seg })
        }
    }
}

pub struct WledSink {
    id: String,
    transport: Box<dyn WledTransport>,
    segments: Arc<SegmentCache>,
}

impl WledSink {
    pub fn new(
        id: impl Into<String>,
        transport: Box<dyn WledTransport>,
        segments: Arc<SegmentCache>,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            segments,
        }
    }
}

impl DeviceSink for WledSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Wled
    }

    fn write(&mut self, command: &SinkCommand) -> Result<(), DispatchError> {
        let SinkCommand::Wled { ip, command } = command else {
            return Err(DispatchError::Unsupported(
                "WLED devices take effect commands only".to_string(),
            ));
        };
        let stale = self.segments.stale(ip, command);
        let body = state_body(command, &stale);
        tracing::debug!("WLED {} <- {}", ip, body);
        self.transport.post_state(ip, &body)?;
        self.segments.commit(ip, command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(String, Value)>>>);

    impl WledTransport for Recorder {
        fn post_state(&self, ip: &str, body: &Value) -> Result<(), DispatchError> {
            self.0.lock().unwrap().push((ip.to_string(), body.clone()));
            Ok(())
        }
    }

    /// Records every post and fails the `fail_on`-th one (0-based)
    #[derive(Clone)]
    struct FlakyTransport {
        posts: Recorder,
        calls: Arc<AtomicUsize>,
        fail_on: usize,
    }

    impl WledTransport for FlakyTransport {
        fn post_state(&self, ip: &str, body: &Value) -> Result<(), DispatchError> {
            self.posts.post_state(ip, body)?;
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(DispatchError::Timeout(format!("{} did not answer", ip)));
            }
            Ok(())
        }
    }

    fn apply(segments: Vec<u32>, flash: bool) -> EffectCommand {
        EffectCommand::Apply {
            segments,
            effect: 9,
            color: [255, 0, 0],
            brightness: 200,
            flash,
        }
    }

    #[test]
    fn test_power_off_body() {
        let body = state_body(&EffectCommand::PowerOff { segments: vec![0, 1] }, &[]);
        assert_eq!(
            body,
            json!({ "seg": [
                { "id": 0, "on": false, "bri": 0 },
                { "id": 1, "on": false, "bri": 0 }
            ]})
        );
    }

    #[test]
    fn test_apply_body_with_flash_and_stale() {
        let body = state_body(&apply(vec![2], true), &[0]);
        assert_eq!(body["on"], json!(true));
        assert_eq!(body["seg"][0]["fx"], json!(1));
        assert_eq!(body["seg"][0]["col"], json!([[255, 0, 0]]));
        assert_eq!(body["seg"][0]["bri"], json!(200));
        assert_eq!(body["seg"][1], json!({ "id": 0, "on": false, "bri": 0 }));
    }

    #[test]
    fn test_sink_turns_off_previous_segments() {
        let recorder = Recorder::default();
        let mut sink = WledSink::new("strip", Box::new(recorder.clone()), Arc::new(SegmentCache::new()));

        for segments in [vec![0, 1], vec![1]] {
            sink.write(&SinkCommand::Wled {
                ip: "10.0.0.5".into(),
                command: apply(segments, false),
            })
            .unwrap();
        }

        let posts = recorder.0.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].0, "10.0.0.5");
        let seg = posts[1].1["seg"].as_array().unwrap();
        assert_eq!(seg.len(), 2);
        assert_eq!(seg[1]["id"], json!(0));
        assert_eq!(seg[1]["on"], json!(false));
    }

    #[test]
    fn test_failed_post_keeps_stale_segments_for_retry() {
        let transport = FlakyTransport {
            posts: Recorder::default(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: 1,
        };
        let cache = Arc::new(SegmentCache::new());
        let mut sink = WledSink::new("strip", Box::new(transport.clone()), cache.clone());
        let write = |sink: &mut WledSink, segments: Vec<u32>| {
            sink.write(&SinkCommand::Wled {
                ip: "10.0.0.5".into(),
                command: apply(segments, false),
            })
        };

        write(&mut sink, vec![0, 1]).unwrap();
        assert!(write(&mut sink, vec![2]).is_err());
        assert_eq!(cache.lit("10.0.0.5"), vec![0, 1]);

        write(&mut sink, vec![2]).unwrap();
        assert_eq!(cache.lit("10.0.0.5"), vec![2]);

        let posts = transport.posts.0.lock().unwrap();
        let retry = posts[2].1["seg"].as_array().unwrap();
        let off: Vec<_> = retry
            .iter()
            .filter(|seg| seg["on"] == json!(false))
            .map(|seg| seg["id"].clone())
            .collect();
        assert_eq!(off, vec![json!(0), json!(1)]);
    }
}
