use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use voxpersona_core::config::DEADLINE_SECS_PER_STAGE;
use voxpersona_core::types::AnalysisContext;
use voxpersona_prompts::{PromptStage, PromptStore, ResolvedPrompts};
use voxpersona_storage::{AuditRepository, PersistedAnalysis, Road};

use crate::chain::ChainExecutor;
use crate::error::{AnalysisError, Result};

/// The closed set of plan shapes. Unknown (scenario, report_type) pairs run
/// linear; the two-phase shape is reserved for the interview
/// "common decision factors" report.
#[derive(Debug, Clone)]
pub enum PromptChainPlan {
    Single {
        chain: Vec<PromptStage>,
    },
    /// Two independent chains over the same input; their outputs are
    /// concatenated (A then B, blank-line separator) and fed to a final
    /// JSON-formatting stage.
    TwoPhaseMergeJson {
        part_a: Vec<PromptStage>,
        part_b: Vec<PromptStage>,
        json_stage: PromptStage,
    },
}

impl PromptChainPlan {
    pub fn stage_count(&self) -> usize {
        match self {
            PromptChainPlan::Single { chain } => chain.len(),
            PromptChainPlan::TwoPhaseMergeJson {
                part_a, part_b, ..
            } => part_a.len() + part_b.len() + 1,
        }
    }
}

/// Report type that triggers the two-phase merge shape.
const TWO_PHASE_REPORT: (&str, &str) = ("interview", "common_decision_factors");

fn wants_two_phase(scenario: &str, report_type: &str) -> bool {
    (scenario, report_type) == TWO_PHASE_REPORT
}

/// Build a plan from the resolved stages.
///
/// The two-phase shape additionally requires exactly two non-JSON run_part
/// groups and exactly one JSON stage; anything else falls back to a single
/// linear chain with the JSON stage (if any) moved last.
fn build_plan(scenario: &str, report_type: &str, stages: &[PromptStage]) -> Result<PromptChainPlan> {
    let (json_stages, linear): (Vec<_>, Vec<_>) =
        stages.iter().cloned().partition(|s| s.is_json);

    if json_stages.len() > 1 {
        return Err(AnalysisError::Internal(format!(
            "{} JSON stages resolved for ({scenario}, {report_type}); at most one is allowed",
            json_stages.len()
        )));
    }
    let json_stage = json_stages.into_iter().next();

    if wants_two_phase(scenario, report_type) {
        let mut parts: Vec<i64> = linear.iter().map(|s| s.run_part).collect();
        parts.dedup();
        if parts.len() == 2 {
            if let Some(json_stage) = json_stage {
                let split = parts[0];
                let (part_a, part_b): (Vec<_>, Vec<_>) =
                    linear.into_iter().partition(|s| s.run_part == split);
                return Ok(PromptChainPlan::TwoPhaseMergeJson {
                    part_a,
                    part_b,
                    json_stage,
                });
            }
        }
        debug!(
            scenario,
            report_type, "two-phase shape not satisfiable; falling back to single"
        );
        // Rebuild the linear order for the fallback.
        return Ok(single_plan(stages));
    }

    Ok(match json_stage {
        Some(json) => {
            let mut chain = linear;
            chain.push(json);
            PromptChainPlan::Single { chain }
        }
        None => PromptChainPlan::Single { chain: linear },
    })
}

fn single_plan(stages: &[PromptStage]) -> PromptChainPlan {
    let (json, mut chain): (Vec<_>, Vec<_>) = stages.iter().cloned().partition(|s| s.is_json);
    chain.extend(json);
    PromptChainPlan::Single { chain }
}

/// What one finished analysis produced.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub final_text: String,
    pub audit_id: i64,
    pub transcription_id: i64,
}

/// Maps a confirmed context and report selection to a plan, executes it,
/// and persists the result through the repository in one unit of work.
pub struct ReportPlanner {
    prompts: Arc<PromptStore>,
    executor: Arc<ChainExecutor>,
    repo: Arc<AuditRepository>,
    /// Explicit request deadline; `None` derives chain_len * 60 s.
    deadline_secs: Option<u64>,
}

impl ReportPlanner {
    pub fn new(
        prompts: Arc<PromptStore>,
        executor: Arc<ChainExecutor>,
        repo: Arc<AuditRepository>,
        deadline_secs: Option<u64>,
    ) -> Self {
        Self {
            prompts,
            executor,
            repo,
            deadline_secs,
        }
    }

    /// Resolve prompts for the context's triple and shape them into a plan.
    pub fn plan(
        &self,
        ctx: &AnalysisContext,
        report_type: &str,
    ) -> Result<(ResolvedPrompts, PromptChainPlan)> {
        let scenario = ctx.mode.scenario_name();
        let resolved = self
            .prompts
            .resolve(scenario, report_type, &ctx.building_type)?;
        let plan = build_plan(scenario, report_type, &resolved.stages)?;
        Ok((resolved, plan))
    }

    /// Run the plan's chains over `input`, returning the final text.
    pub async fn execute(
        &self,
        plan: &PromptChainPlan,
        input: &str,
        deadline: Instant,
    ) -> Result<String> {
        if input.trim().is_empty() {
            return Err(AnalysisError::InvalidInput(
                "empty transcription".to_string(),
            ));
        }
        match plan {
            PromptChainPlan::Single { chain } => self.executor.run(chain, input, deadline).await,
            PromptChainPlan::TwoPhaseMergeJson {
                part_a,
                part_b,
                json_stage,
            } => {
                // Both chains see the same input. The pool decides whether
                // they actually overlap; concatenation order is fixed to
                // A then B regardless of which finishes first.
                let (a, b) = tokio::join!(
                    self.executor.run(part_a, input, deadline),
                    self.executor.run(part_b, input, deadline),
                );
                let merged = format!("{}\n\n{}", a?, b?);
                self.executor
                    .run(std::slice::from_ref(json_stage), &merged, deadline)
                    .await
            }
        }
    }

    /// Plan, execute, and persist. Nothing is written unless the chain
    /// succeeded; the transcription, audit and user_road rows commit
    /// atomically.
    pub async fn execute_and_persist(
        &self,
        ctx: &AnalysisContext,
        report_type: &str,
        source_name: &str,
        input: &str,
    ) -> Result<AnalysisOutcome> {
        let (resolved, plan) = self.plan(ctx, report_type)?;
        let deadline_secs = self
            .deadline_secs
            .unwrap_or(plan.stage_count().max(1) as u64 * DEADLINE_SECS_PER_STAGE);
        let deadline = Instant::now() + Duration::from_secs(deadline_secs);

        let final_text = self.execute(&plan, input, deadline).await?;

        let road = Road {
            scenario_id: resolved.scenario_id,
            report_type_id: resolved.report_type_id,
            building_id: resolved.building_id,
        };
        let persisted: PersistedAnalysis =
            self.repo
                .persist_analysis(ctx, source_name, input, &final_text, road)?;

        info!(
            audit_id = persisted.audit_id,
            report_type, "analysis complete"
        );
        Ok(AnalysisOutcome {
            final_text,
            audit_id: persisted.audit_id,
            transcription_id: persisted.transcription_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    use voxpersona_core::types::Mode;
    use voxpersona_llm::{
        BackendError, ChatBackend, ChatOutcome, ChatRequest, Credential, CredentialPool,
        LlmGateway, TokenCounter,
    };

    fn stage(id: i64, text: &str, run_part: i64, is_json: bool) -> PromptStage {
        PromptStage {
            prompt_id: id,
            text: text.to_string(),
            run_part,
            is_json,
        }
    }

    // --- plan shaping --------------------------------------------------------

    #[test]
    fn linear_prompts_make_a_single_plan() {
        let stages = vec![stage(1, "a", 1, false), stage(2, "b", 1, false)];
        let plan = build_plan("interview", "methodology", &stages).unwrap();
        assert!(matches!(plan, PromptChainPlan::Single { ref chain } if chain.len() == 2));
    }

    #[test]
    fn json_stage_moves_last_in_single_plan() {
        // The JSON stage is stored in the middle group but runs last.
        let stages = vec![
            stage(1, "a", 1, false),
            stage(2, "fmt", 2, true),
            stage(3, "b", 3, false),
        ];
        let plan = build_plan("design", "compliance", &stages).unwrap();
        match plan {
            PromptChainPlan::Single { chain } => {
                assert_eq!(chain.last().unwrap().prompt_id, 2);
                assert!(chain.last().unwrap().is_json);
            }
            _ => panic!("expected single plan"),
        }
    }

    #[test]
    fn decision_factors_makes_two_phase_plan() {
        let stages = vec![
            stage(1, "pa", 1, false),
            stage(2, "pb", 2, false),
            stage(3, "pj", 3, true),
        ];
        let plan = build_plan("interview", "common_decision_factors", &stages).unwrap();
        match plan {
            PromptChainPlan::TwoPhaseMergeJson {
                part_a,
                part_b,
                json_stage,
            } => {
                assert_eq!(part_a[0].prompt_id, 1);
                assert_eq!(part_b[0].prompt_id, 2);
                assert_eq!(json_stage.prompt_id, 3);
            }
            _ => panic!("expected two-phase plan"),
        }
    }

    #[test]
    fn two_phase_without_json_stage_falls_back_to_single() {
        let stages = vec![stage(1, "pa", 1, false), stage(2, "pb", 2, false)];
        let plan = build_plan("interview", "common_decision_factors", &stages).unwrap();
        assert!(matches!(plan, PromptChainPlan::Single { ref chain } if chain.len() == 2));
    }

    #[test]
    fn duplicate_json_stages_are_an_invariant_violation() {
        let stages = vec![stage(1, "j1", 1, true), stage(2, "j2", 2, true)];
        let err = build_plan("design", "compliance", &stages).unwrap_err();
        assert!(matches!(err, AnalysisError::Internal(_)));
    }

    // --- execution -----------------------------------------------------------

    /// Replies `<first-prompt-line>(<payload>)`, optionally after a delay
    /// configured per prompt marker. Records every payload it saw.
    struct ComposingBackend {
        delays: Vec<(&'static str, Duration)>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ComposingBackend {
        fn new() -> Self {
            Self {
                delays: Vec::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn with_delays(delays: Vec<(&'static str, Duration)>) -> Self {
            Self {
                delays,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn payload_for(&self, prompt: &str) -> Option<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .find(|(p, _)| p == prompt)
                .map(|(_, payload)| payload.clone())
        }
    }

    #[async_trait]
    impl ChatBackend for ComposingBackend {
        fn name(&self) -> &str {
            "composing"
        }

        async fn send(
            &self,
            req: &ChatRequest,
            _credential: &Credential,
        ) -> std::result::Result<ChatOutcome, BackendError> {
            let content = &req.messages[0].content;
            let (prompt, payload) = match content.split_once("\n\nText:\n") {
                Some((p, rest)) => (p, rest),
                None => content.split_once("\n\n").unwrap_or((content, "")),
            };
            let prompt = prompt.to_string();
            let payload = payload.to_string();

            if let Some((_, delay)) = self.delays.iter().find(|(m, _)| prompt.contains(m)) {
                tokio::time::sleep(*delay).await;
            }
            self.seen.lock().unwrap().push((prompt.clone(), payload.clone()));

            Ok(ChatOutcome {
                content: format!("{prompt}({payload})"),
                tokens_in: 50,
                tokens_out: 10,
            })
        }
    }

    fn pool(n: u32) -> Arc<CredentialPool> {
        let creds = (1..=n)
            .map(|id| Credential {
                id,
                secret: format!("k{id}"),
                tpm: 1_000_000,
                rpm: 10_000,
            })
            .collect();
        Arc::new(CredentialPool::new(creds))
    }

    fn executor(backend: Arc<dyn ChatBackend>, creds: u32) -> Arc<ChainExecutor> {
        let gateway = Arc::new(LlmGateway::new(backend, "test-model", 256));
        let counter = Arc::new(TokenCounter::for_model("test-model"));
        Arc::new(ChainExecutor::new(gateway, pool(creds), counter))
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[tokio::test]
    async fn chain_composes_output_to_input() {
        let backend = Arc::new(ComposingBackend::new());
        let exec = executor(backend, 1);
        let stages = vec![
            stage(1, "P1", 1, false),
            stage(2, "P2", 1, false),
            stage(3, "P3", 1, false),
        ];
        let out = exec.run(&stages, "input", far()).await.unwrap();
        assert_eq!(out, "P3(P2(P1(input)))");
    }

    #[tokio::test(start_paused = true)]
    async fn merge_order_is_fixed_regardless_of_finish_order() {
        // Pa is much slower than Pb; the JSON stage must still see A-then-B.
        let backend = Arc::new(ComposingBackend::with_delays(vec![
            ("Pa", Duration::from_millis(500)),
            ("Pb", Duration::from_millis(10)),
        ]));
        let exec = executor(backend.clone(), 2);

        let plan = PromptChainPlan::TwoPhaseMergeJson {
            part_a: vec![stage(1, "Pa", 1, false)],
            part_b: vec![stage(2, "Pb", 2, false)],
            json_stage: stage(3, "Pj", 3, true),
        };
        let planner = ReportPlanner::new(
            Arc::new(PromptStore::new(rusqlite::Connection::open_in_memory().unwrap())),
            exec,
            Arc::new(AuditRepository::new(
                rusqlite::Connection::open_in_memory().unwrap(),
            )),
            None,
        );

        let out = planner.execute(&plan, "T", far()).await.unwrap();
        assert_eq!(out, "Pj(Pa(T)\n\nPb(T))");
        assert_eq!(backend.payload_for("Pj").unwrap(), "Pa(T)\n\nPb(T)");
    }

    // --- end-to-end with persistence -----------------------------------------

    fn seeded_stack(
        backend: Arc<dyn ChatBackend>,
    ) -> (ReportPlanner, Arc<AuditRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vox.db");

        let seed = rusqlite::Connection::open(&path).unwrap();
        voxpersona_prompts::db::init_db(&seed).unwrap();
        voxpersona_storage::db::init_db(&seed).unwrap();
        seed.execute_batch(
            "INSERT INTO scenario (name) VALUES ('interview');
             INSERT INTO report_type (desc, scenario_id) VALUES ('methodology_assessment', 1);
             INSERT INTO building_type (name) VALUES ('hotel');
             INSERT INTO prompt (text, run_part, is_json) VALUES ('P_meth', 1, 0);
             INSERT INTO prompt_building_report (prompt_id, building_id, report_type_id)
                VALUES (1, 1, 1);",
        )
        .unwrap();
        drop(seed);

        let prompts = Arc::new(PromptStore::new(rusqlite::Connection::open(&path).unwrap()));
        let repo_conn = rusqlite::Connection::open(&path).unwrap();
        voxpersona_storage::db::init_db(&repo_conn).unwrap();
        let repo = Arc::new(AuditRepository::new(repo_conn));
        let planner = ReportPlanner::new(prompts, executor(backend, 2), repo.clone(), None);
        (planner, repo, dir)
    }

    fn interview_ctx() -> AnalysisContext {
        AnalysisContext {
            audio_number: 1,
            date: "2026-06-01".to_string(),
            employee: "Orlova".to_string(),
            client: Some("Guest".to_string()),
            place: "Grand Plaza".to_string(),
            building_type: "hotel".to_string(),
            zone: None,
            city: None,
            mode: Mode::Interview,
        }
    }

    /// Always replies "score=87" when the transcript is present in the call.
    struct ScoringBackend;

    #[async_trait]
    impl ChatBackend for ScoringBackend {
        fn name(&self) -> &str {
            "scoring"
        }
        async fn send(
            &self,
            req: &ChatRequest,
            _credential: &Credential,
        ) -> std::result::Result<ChatOutcome, BackendError> {
            assert!(req.messages[0].content.contains("Interviewer:"));
            Ok(ChatOutcome {
                content: "score=87".to_string(),
                tokens_in: 40,
                tokens_out: 4,
            })
        }
    }

    #[tokio::test]
    async fn single_chain_persists_audit_and_road() {
        let (planner, repo, _dir) = seeded_stack(Arc::new(ScoringBackend));
        let out = planner
            .execute_and_persist(
                &interview_ctx(),
                "methodology_assessment",
                "a.ogg",
                "Interviewer: how was the stay? Guest: fine.",
            )
            .await
            .unwrap();

        assert_eq!(out.final_text, "score=87");
        let groups = repo.grouped_reports(Some("interview"), None).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].report_type, "methodology_assessment");
        assert_eq!(groups[0].texts, vec!["score=87"]);
    }

    #[tokio::test]
    async fn failed_chain_persists_nothing() {
        struct FailingBackend;

        #[async_trait]
        impl ChatBackend for FailingBackend {
            fn name(&self) -> &str {
                "failing"
            }
            async fn send(
                &self,
                _req: &ChatRequest,
                _credential: &Credential,
            ) -> std::result::Result<ChatOutcome, BackendError> {
                Err(BackendError::Api {
                    status: 400,
                    message: "bad request".to_string(),
                })
            }
        }

        let (planner, repo, _dir) = seeded_stack(Arc::new(FailingBackend));
        let err = planner
            .execute_and_persist(&interview_ctx(), "methodology_assessment", "a.ogg", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Gateway(_)));
        assert!(repo.find_transcription("a.ogg").unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_any_call() {
        let (planner, _repo, _dir) = seeded_stack(Arc::new(ScoringBackend));
        let (_, plan) = planner
            .plan(&interview_ctx(), "methodology_assessment")
            .unwrap();
        let err = planner.execute(&plan, "   ", far()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }
}
