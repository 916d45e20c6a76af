use async_trait::async_trait;
use futures::stream;
use std::sync::{Arc, Mutex};

use super::base::{Provider, TurnRequest};
use crate::errors::{CourierError, CourierResult};
use crate::normalizer::{RawEvent, RawStream};

/// A provider that replays scripted raw events, one script per call
pub struct ScriptedProvider {
    name: &'static str,
    scripts: Arc<Mutex<Vec<Vec<RawEvent>>>>,
    requests: Arc<Mutex<Vec<TurnRequest>>>,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, scripts: Vec<Vec<RawEvent>>) -> Self {
        Self {
            name,
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn open(&self, request: TurnRequest) -> CourierResult<RawStream> {
        self.requests.lock().unwrap().push(request);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(CourierError::Provider("no scripted response left".to_string()));
        }
        Ok(Box::pin(stream::iter(scripts.remove(0))))
    }
}
