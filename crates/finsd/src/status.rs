use std::io::{self, Write};
use std::sync::{Arc, RwLock};

use renderer::{PerformanceStatus, ShaderStatus, StatusSink, UniformStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Animation ids advertised in shader status; replaced on config reload.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    ids: Arc<RwLock<Vec<String>>>,
}

impl Catalogue {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids: Arc::new(RwLock::new(ids)),
        }
    }

    pub fn replace(&self, ids: Vec<String>) {
        if let Ok(mut guard) = self.ids.write() {
            *guard = ids;
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.ids.read().map(|ids| ids.clone()).unwrap_or_default()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum StatusLine<'a> {
    Performance(&'a PerformanceStatus),
    Shader(&'a ShaderStatus),
    Uniforms(&'a UniformStatus),
}

/// Reports engine status through tracing, and optionally as JSON lines on stdout.
pub struct StatusReporter {
    catalogue: Catalogue,
    json: bool,
}

impl StatusReporter {
    pub fn new(catalogue: Catalogue, json: bool) -> Self {
        Self { catalogue, json }
    }

    fn emit(&self, line: StatusLine<'_>) {
        if !self.json {
            return;
        }
        let encoded = match serde_json::to_string(&line) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "failed to encode status");
                return;
            }
        };
        let mut stdout = io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{encoded}").and_then(|_| stdout.flush()) {
            warn!(error = %err, "failed to write status");
        }
    }
}

impl StatusSink for StatusReporter {
    fn performance(&mut self, status: &PerformanceStatus) {
        debug!(fps = status.fps, "render rate");
        self.emit(StatusLine::Performance(status));
    }

    fn shader(&mut self, status: &ShaderStatus) {
        let mut status = status.clone();
        status.available = self.catalogue.snapshot();
        for (fin, current) in &status.current {
            let transition = status.transition.get(fin);
            info!(
                display = %fin,
                current = current.as_deref().unwrap_or("-"),
                transitioning = transition.map(|t| t.active).unwrap_or(false),
                "shader state"
            );
        }
        self.emit(StatusLine::Shader(&status));
    }

    fn uniforms(&mut self, status: &UniformStatus) {
        debug!(displays = status.len(), "uniform state changed");
        self.emit(StatusLine::Uniforms(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{DisplayId, TransitionStatus};
    use std::collections::BTreeMap;

    #[test]
    fn catalogue_is_shared_between_clones() {
        let catalogue = Catalogue::new(vec!["stars".into()]);
        let reporter_view = catalogue.clone();
        catalogue.replace(vec!["stars".into(), "rainbow".into()]);
        assert_eq!(reporter_view.snapshot(), vec!["stars", "rainbow"]);
    }

    #[test]
    fn status_lines_are_tagged_by_kind() {
        let mut status = ShaderStatus {
            available: vec!["stars".into()],
            ..ShaderStatus::default()
        };
        status
            .current
            .insert(DisplayId::Left, Some("stars".to_string()));
        status.transition.insert(
            DisplayId::Left,
            TransitionStatus {
                active: true,
                target: Some("rainbow".into()),
                queued: None,
            },
        );

        let value = serde_json::to_value(StatusLine::Shader(&status)).unwrap();
        assert_eq!(value["shader"]["available"][0], "stars");
        assert_eq!(value["shader"]["current"]["left"], "stars");
        assert_eq!(value["shader"]["transition"]["left"]["active"], true);
        assert_eq!(value["shader"]["transition"]["left"]["target"], "rainbow");

        let uniforms: UniformStatus = BTreeMap::new();
        let value = serde_json::to_value(StatusLine::Uniforms(&uniforms)).unwrap();
        assert!(value["uniforms"].as_object().unwrap().is_empty());
    }
}
