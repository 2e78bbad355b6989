//! End-to-end group runs over the assembled service with an in-process game API.

use async_trait::async_trait;
use image::{ImageBuffer, Luma};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use giftcode_redeemer::api::{Challenge, Endpoint, GameApi, Session, SubmitReply};
use giftcode_redeemer::common::config::AppConfig;
use giftcode_redeemer::common::error::{ApiError, ClassifierError};
use giftcode_redeemer::common::messages::{
    Account, AccountId, CodeSource, CodeStatus, RedemptionStatus,
};
use giftcode_redeemer::processing::{CharacterModel, ImageClassifier, ModelMetadata};
use giftcode_redeemer::store::{CodeRegistry, LogNotifier, MemoryStore, NotifierEvent, OutcomeCache};
use giftcode_redeemer::validation::EnqueueResponse;
use giftcode_redeemer::Service;

const GROUP: u64 = 42;

/// Game service double: every login works, every challenge is the same
/// image, and submissions answer from a per-account table.
#[derive(Default)]
struct FakeGame {
    replies: Mutex<HashMap<AccountId, (String, Option<i64>)>>,
    submits: Mutex<Vec<AccountId>>,
}

impl FakeGame {
    fn answer(&self, account: AccountId, msg: &str, err_code: i64) {
        self.replies
            .lock()
            .unwrap()
            .insert(account, (msg.to_string(), Some(err_code)));
    }

    fn submits_for(&self, account: AccountId) -> usize {
        self.submits.lock().unwrap().iter().filter(|a| **a == account).count()
    }

    fn total_submits(&self) -> usize {
        self.submits.lock().unwrap().len()
    }
}

#[async_trait]
impl GameApi for FakeGame {
    async fn login(&self, _: Endpoint, account: AccountId) -> Result<Session, ApiError> {
        Ok(Session::detached(account, format!("player{}", account)))
    }

    async fn fetch_challenge(&self, _: &Session) -> Result<Challenge, ApiError> {
        Ok(Challenge::Image(challenge_png()))
    }

    async fn submit_code(
        &self,
        session: &Session,
        _code: &str,
        answer: &str,
    ) -> Result<SubmitReply, ApiError> {
        assert_eq!(answer, "AB12");
        self.submits.lock().unwrap().push(session.account);
        let (msg, err_code) = self
            .replies
            .lock()
            .unwrap()
            .get(&session.account)
            .cloned()
            .unwrap_or_else(|| ("SUCCESS".to_string(), Some(20000)));
        Ok(SubmitReply { msg, err_code })
    }

    async fn probe(&self, _: Endpoint, _: AccountId) -> bool {
        true
    }
}

/// Always reads "AB12".
struct ConfidentModel;

impl CharacterModel for ConfidentModel {
    fn infer(&self, _: &[f32], _: usize, _: usize) -> Result<Vec<Vec<f32>>, ClassifierError> {
        Ok([0usize, 1, 2, 3]
            .iter()
            .map(|idx| {
                let mut probs = vec![0.05; 4];
                probs[*idx] = 0.85;
                probs
            })
            .collect())
    }
}

fn challenge_png() -> Vec<u8> {
    let img: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_fn(40, 20, |x, _| Luma([(x * 6) as u8]));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn classifier() -> ImageClassifier {
    let metadata = ModelMetadata::from_json(
        r#"{
            "input_shape": [1, 20, 40],
            "normalization": {"mean": [0.5], "std": [0.5]},
            "idx_to_char": {"0": "A", "1": "B", "2": "1", "3": "2"},
            "chars": "AB12"
        }"#,
    )
    .unwrap();
    ImageClassifier::from_model(Box::new(ConfidentModel), metadata)
}

struct Harness {
    service: Service,
    store: Arc<MemoryStore>,
    notifier: Arc<LogNotifier>,
    game: Arc<FakeGame>,
}

async fn harness(members: impl IntoIterator<Item = AccountId>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for id in members {
        store
            .add_account(Account {
                id,
                nickname: format!("player{}", id),
                group_id: GROUP,
            })
            .await;
    }
    let notifier = Arc::new(LogNotifier::new());
    let game = Arc::new(FakeGame::default());

    let service = Service::assemble(
        AppConfig::default(),
        store.clone(),
        notifier.clone(),
        game.clone(),
        classifier(),
    )
    .await;

    Harness {
        service,
        store,
        notifier,
        game,
    }
}

#[tokio::test(start_paused = true)]
async fn test_group_run_redeems_every_member() {
    let h = harness([1, 2, 3]).await;
    h.game.answer(2, "RECEIVED.", 40008);

    let report = h.service.orchestrator.run(GROUP, "SPRING24").await.unwrap();

    assert_eq!(report.counts.total, 3);
    assert_eq!(report.counts.success, 2);
    assert_eq!(report.counts.already_received, 1);
    assert_eq!(report.counts.failed, 0);
    assert_eq!(h.game.total_submits(), 3);

    let registry: &dyn CodeRegistry = h.store.as_ref();
    assert_eq!(
        registry.get("SPRING24").await.unwrap().unwrap().status,
        CodeStatus::Validated
    );
    assert_eq!(
        OutcomeCache::get(h.store.as_ref(), 1, "SPRING24").await.unwrap(),
        Some(RedemptionStatus::Success)
    );

    // A second run is served entirely from the outcome cache
    let again = h.service.orchestrator.run(GROUP, "SPRING24").await.unwrap();
    assert_eq!(again.counts.already_received, 3);
    assert_eq!(h.game.total_submits(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_halts_the_rest_of_the_group() {
    let h = harness(7..57).await;
    h.game.answer(7, "CDK NOT FOUND.", 40014);

    let report = h.service.orchestrator.run(GROUP, "WINTER").await.unwrap();

    assert_eq!(report.counts.total, 50);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.halted, 49);
    assert_eq!(report.halted_by, Some(RedemptionStatus::NotFound));
    assert_eq!(h.game.submits_for(7), 1);
    assert_eq!(h.game.total_submits(), 1);

    let registry: &dyn CodeRegistry = h.store.as_ref();
    assert_eq!(
        registry.get("WINTER").await.unwrap().unwrap().status,
        CodeStatus::Invalid
    );
    assert!(h.notifier.events().await.iter().any(|e| matches!(
        e,
        NotifierEvent::Summary { counts, .. } if counts.halted == 49
    )));
}

#[tokio::test(start_paused = true)]
async fn test_submitted_code_is_validated_then_auto_redeemed() {
    let h = harness([1, 2]).await;
    h.store.set_auto_redeem(GROUP, true).await;

    let response = h
        .service
        .queue
        .enqueue(" SUMMER25 ", CodeSource::Submission, Some("chat-1".to_string()))
        .await;
    assert_eq!(response, EnqueueResponse::Queued { position: 1 });

    let mut summary = None;
    for _ in 0..3600 {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        summary = h.notifier.events().await.into_iter().find_map(|e| match e {
            NotifierEvent::Summary { counts, .. } => Some(counts),
            _ => None,
        });
        if summary.is_some() {
            break;
        }
    }

    let counts = summary.expect("auto-redeem run never finished");
    assert_eq!(counts.total, 2);
    assert_eq!(counts.success + counts.already_received, 2);
    assert_eq!(counts.failed, 0);

    let events = h.notifier.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        NotifierEvent::Reply(reply) if reply.code == "SUMMER25"
            && reply.reply_to.as_deref() == Some("chat-1")
    )));

    let registry: &dyn CodeRegistry = h.store.as_ref();
    assert_eq!(
        registry.get("SUMMER25").await.unwrap().unwrap().status,
        CodeStatus::Validated
    );
    assert_eq!(
        h.service.queue.enqueue("SUMMER25", CodeSource::Scan, None).await,
        EnqueueResponse::AlreadyKnown {
            status: CodeStatus::Validated
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_sweep_invalidates_code_the_member_already_redeemed() {
    let h = harness([1]).await;
    let report = h.service.orchestrator.run(GROUP, "SPRING24").await.unwrap();
    assert_eq!(report.counts.success, 1);
    assert_eq!(
        OutcomeCache::get(h.store.as_ref(), 1, "SPRING24").await.unwrap(),
        Some(RedemptionStatus::Success)
    );

    // The only member is picked to validate; its cached success must not
    // stand in for the live answer
    h.game.answer(1, "CDK NOT FOUND.", 40014);
    let sweep = h.service.sweeper.sweep_once().await;

    assert_eq!(sweep.checked, 1);
    assert_eq!(sweep.invalidated, 1);
    assert_eq!(h.game.submits_for(1), 2);

    let registry: &dyn CodeRegistry = h.store.as_ref();
    assert_eq!(
        registry.get("SPRING24").await.unwrap().unwrap().status,
        CodeStatus::Invalid
    );
    assert!(h.notifier.events().await.iter().any(|e| matches!(
        e,
        NotifierEvent::Admin { message } if message.contains("SPRING24")
    )));
}
