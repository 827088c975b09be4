#![allow(dead_code)]

use std::{
    collections::VecDeque,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use gradeflow::{
    activity::{ActivityConfig, ActivityKind, ResolvedActivity},
    evaluate::{CompletionService, EvaluationError},
    rubric::Rubric,
};
use uuid::Uuid;

pub fn temp_root(label: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("gradeflow-{label}-{}", Uuid::new_v4()));
    fs::create_dir_all(&root).expect("create temp root");
    root
}

pub const RUBRIC_JSON: &str = r#"{
    "nombre": "Ensayo",
    "criterios": [
        {"nombre": "Portada", "maximo": 5,
         "niveles": [{"puntaje": 5, "descripcion": "Completa"}, {"puntaje": 0, "descripcion": "Ausente"}]},
        {"nombre": "Introducción", "maximo": 60,
         "niveles": [{"puntaje": 60, "descripcion": "Clara"}, {"puntaje": 30, "descripcion": "Parcial"}]}
    ]
}"#;

pub fn rubric() -> Rubric {
    Rubric::from_json(RUBRIC_JSON).expect("rubric")
}

pub fn activity() -> ResolvedActivity {
    ResolvedActivity {
        course:          "FI08".into(),
        unit:            1,
        config:          ActivityConfig {
            id:           "1.1".into(),
            title:        "Ensayo inicial".into(),
            kind:         ActivityKind::Written,
            extract_text: true,
            rubric_ref:   "rubrica.json".into(),
            prompt_ref:   "prompt.md".into(),
            instructions: "Escribe un ensayo breve.".into(),
        },
        rubric:          rubric(),
        rubric_ref:      "rubrica.json".into(),
        prompt_template: "Eres un evaluador de ensayos universitarios.".into(),
    }
}

/// Writes a course document, rubric and prompt into `root` and returns the
/// course path.
pub fn write_course(root: &std::path::Path) -> PathBuf {
    fs::write(root.join("rubrica.json"), RUBRIC_JSON).expect("write rubric");
    fs::write(root.join("prompt.md"), "Eres un evaluador de ensayos universitarios.")
        .expect("write prompt");
    let course = root.join("curso.json");
    fs::write(
        &course,
        r#"{"codigo": "FI08", "nombre": "Física", "unidades": [
            {"unidad": 1, "actividades": [
                {"id": "1.1", "titulo": "Ensayo inicial", "tipo": "escrito", "extraer_texto": true,
                 "rubrica": "rubrica.json", "prompt": "prompt.md",
                 "instrucciones": "Escribe un ensayo breve."}
            ]}
        ]}"#,
    )
    .expect("write course");
    course
}

pub fn reply(scores: &[(&str, f64)]) -> String {
    let scores: Vec<serde_json::Value> = scores
        .iter()
        .map(|(criterion, score)| {
            serde_json::json!({"criterion": criterion, "score": score, "justification": "ok"})
        })
        .collect();
    serde_json::json!({"scores": scores, "narrative": "Buen trabajo.", "summary": "Bien."})
        .to_string()
}

/// Replays canned replies and records every (system, user) pair it receives.
/// Once the script runs out, the fallback reply is returned forever.
#[derive(Clone, Default)]
pub struct ScriptedService {
    pub script:   Arc<Mutex<VecDeque<Result<String, EvaluationError>>>>,
    pub fallback: Option<String>,
    pub calls:    Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedService {
    pub fn new(script: Vec<Result<String, EvaluationError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Self::default()
        }
    }

    pub fn always(reply: String) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn user_messages(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, user)| user.clone())
            .collect()
    }
}

impl CompletionService for ScriptedService {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EvaluationError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((system.to_string(), user.to_string()));
        let next = self.script.lock().expect("script lock").pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(EvaluationError::Service("script exhausted".into())),
        }
    }
}
