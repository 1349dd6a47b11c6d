//! End-to-end chat turns over the in-memory store with scripted models.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campus_assistant::orchestrator::ChatRequest;
use campus_assistant::replies;
use campus_assistant::retriever::{HybridRetriever, RetrievalParams};
use campus_assistant_core::error::ExternalError;
use campus_assistant_core::llm::{ChatModel, CompletionRequest, TokenSink};
use campus_assistant_core::models::{
    AnswerKind, ChatTurn, Language, Role, Scope, SourceType, Stage,
};
use campus_assistant_core::rerank::fused_order;
use campus_assistant_core::sparse::{SparseQuery, SparseEncoder};
use campus_assistant_core::store::{SearchFilter, StoreHit, VectorStore};
use tokio_util::sync::CancellationToken;

use common::{chunk, memory_store, orchestrator, Call, KeywordEmbedder, Options, StageModel};

fn neural_corpus() -> Vec<campus_assistant_core::models::Chunk> {
    vec![
        chunk(
            "chunk1",
            "https://x/1",
            "A neural network is a model of connected neural units.",
            SourceType::Cms,
            None,
        ),
        chunk(
            "chunk2",
            "https://x/2",
            "Neural nets learn weights from data.",
            SourceType::Cms,
            None,
        ),
        chunk(
            "chunk3",
            "https://x/3",
            "Ein Zertifikat gibt es nach jedem Kurs.",
            SourceType::Cms,
            None,
        ),
    ]
}

// ============ Scenarios ============

#[tokio::test]
async fn test_single_source_answer_cites_top_chunk() {
    let model = Arc::new(StageModel::answering(
        "A neural network is a model of connected units [doc1].",
    ));
    let kic = orchestrator(model.clone(), memory_store(neural_corpus()), Options::default());

    let response = kic
        .chat(
            ChatRequest::new("What is a neural network?", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let answer = response.answer;
    assert_eq!(answer.kind, AnswerKind::Grounded);
    assert_eq!(answer.language, Language::English);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].url, "https://x/1");
    assert_eq!(answer.citations[0].marker_index, 1);
    assert!(answer.text.contains("[[1]](https://x/1)"));
    assert!(answer.degraded.is_empty());
    // No history, nothing to rewrite.
    assert_eq!(model.calls(Call::Contextualize), 0);
}

#[tokio::test]
async fn test_empty_retrieval_gives_insufficient_information() {
    let model = Arc::new(StageModel::answering("Sechs Wochen [doc1]."));
    let kic = orchestrator(model.clone(), memory_store(neural_corpus()), Options::default());

    let response = kic
        .chat(
            ChatRequest::new("Wie lange dauert der Kurs?", Scope::course(999)),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let answer = response.answer;
    assert_eq!(answer.kind, AnswerKind::InsufficientInformation);
    assert_eq!(answer.text, replies::insufficient_information(Language::German));
    assert!(answer.citations.is_empty());
    assert_eq!(model.calls(Call::Answer), 0);
}

#[tokio::test]
async fn test_out_of_range_marker_is_dropped() {
    let model = Arc::new(StageModel::answering("Use [doc1] and [doc9]"));
    let kic = orchestrator(model.clone(), memory_store(neural_corpus()), Options::default());

    let response = kic
        .chat(
            ChatRequest::new("neural network zertifikat", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let answer = response.answer;
    let sources = model.requests(Call::Answer)[0].messages.last().unwrap().content.clone();
    assert!(sources.contains("[doc3]"));
    assert!(!sources.contains("[doc4]"));

    assert_eq!(answer.citations.len(), 1);
    assert!(answer.text.starts_with("Use [[1]]("));
    assert!(answer.text.ends_with(") and"));
    assert!(!answer.text.contains("doc9"));
}

#[tokio::test]
async fn test_history_is_capped_per_session() {
    let model = Arc::new(StageModel::answering("Antwort [doc1]."));
    let kic = orchestrator(
        model.clone(),
        memory_store(neural_corpus()),
        Options {
            max_turns: 4,
            ..Default::default()
        },
    );

    let mut session_id = None;
    for i in 0..3 {
        let mut request = ChatRequest::new(format!("Frage {} zum neural network", i), Scope::general());
        request.session_id = session_id.clone();
        let response = kic.chat(request, CancellationToken::new()).await.unwrap();
        session_id = Some(response.session_id);
    }

    let session = kic.sessions().get(session_id.as_deref().unwrap()).await.unwrap();
    let ctx = session.lock().await;
    let turns = ctx.history.to_vec();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].text, "Frage 1 zum neural network");
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[2].text, "Frage 2 zum neural network");
    assert_eq!(turns[3].role, Role::Assistant);

    // The model never sees more than the capped history plus the question.
    let last = model.requests(Call::Answer).pop().unwrap();
    assert_eq!(last.messages.len(), 5);
}

// ============ Properties ============

#[tokio::test]
async fn test_chunks_without_url_are_never_cited() {
    let mut corpus = neural_corpus();
    corpus.push(chunk(
        "no-url",
        "  ",
        "neural network neural network neural network",
        SourceType::Cms,
        None,
    ));
    let model = Arc::new(StageModel::answering("[doc1] [doc2] [doc3] [doc4]"));
    let kic = orchestrator(model.clone(), memory_store(corpus), Options::default());

    let answer = kic
        .chat(
            ChatRequest::new("neural network", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .answer;

    assert!(!answer.citations.is_empty());
    for c in &answer.citations {
        assert!(!c.url.trim().is_empty());
        assert!(["https://x/1", "https://x/2", "https://x/3"].contains(&c.url.as_str()));
    }
    let prompt = model.requests(Call::Answer).remove(0).messages.remove(0).content;
    assert!(!prompt.contains("no-url"));
}

#[tokio::test]
async fn test_only_url_less_chunks_answer_insufficient() {
    let corpus = vec![chunk("a", "", "neural network basics", SourceType::Cms, None)];
    let model = Arc::new(StageModel::answering("[doc1]"));
    let kic = orchestrator(model.clone(), memory_store(corpus), Options::default());

    let answer = kic
        .chat(
            ChatRequest::new("neural network", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .answer;
    assert_eq!(answer.kind, AnswerKind::InsufficientInformation);
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn test_identical_turns_cite_identical_sources() {
    let model = Arc::new(StageModel::answering("[doc2] und [doc1]"));
    let kic = orchestrator(model, memory_store(neural_corpus()), Options::default());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let answer = kic
            .chat(
                ChatRequest::new("neural network zertifikat", Scope::general()),
                CancellationToken::new(),
            )
            .await
            .unwrap()
            .answer;
        runs.push(answer.citations);
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].len(), 2);
}

#[tokio::test]
async fn test_rerank_failure_uses_fused_order() {
    let model = Arc::new(StageModel::new(|call, _| match call {
        Call::Rerank => Err(ExternalError::status("llm", 503, "overloaded")),
        _ => Ok("[doc1]".to_string()),
    }));
    let store = memory_store(neural_corpus());
    let kic = orchestrator(
        model.clone(),
        store.clone(),
        Options {
            top_n: 2,
            ..Default::default()
        },
    );

    let answer = kic
        .chat(
            ChatRequest::new("neural network", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .answer;
    assert_eq!(answer.degraded, vec![Stage::Rerank]);
    assert_eq!(answer.kind, AnswerKind::Grounded);

    let retriever = HybridRetriever::new(
        store,
        Some(Arc::new(KeywordEmbedder)),
        SparseEncoder::default(),
        RetrievalParams::default(),
        common::fast_policy(0),
    );
    let fused = retriever.retrieve("neural network", &Scope::general()).await.unwrap();
    let expected = fused_order(&fused, 2);

    let prompt = model.requests(Call::Answer)[0].messages[0].content.clone();
    let first = prompt.find(&expected[0].chunk().metadata.url).unwrap();
    let second = prompt.find(&expected[1].chunk().metadata.url).unwrap();
    assert!(first < second);
    assert!(!prompt.contains("[doc3]"));
    assert_eq!(answer.citations[0].url, expected[0].chunk().metadata.url);
}

// ============ Failures and fallbacks ============

struct BrokenStore;

#[async_trait]
impl VectorStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn dense_search(
        &self,
        _vector: &[f32],
        _filter: &SearchFilter,
        _k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        Err(ExternalError::transport("broken", "connection refused"))
    }

    async fn sparse_search(
        &self,
        _query: &SparseQuery,
        _filter: &SearchFilter,
        _k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        Err(ExternalError::transport("broken", "connection refused"))
    }
}

#[tokio::test]
async fn test_retrieval_failure_cannot_answer() {
    let model = Arc::new(StageModel::answering("[doc1]"));
    let kic = orchestrator(model.clone(), Arc::new(BrokenStore), Options::default());

    let response = kic
        .chat(
            ChatRequest::new("Wie bekomme ich ein Zertifikat?", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.answer.kind, AnswerKind::CannotAnswer);
    assert_eq!(response.answer.text, replies::cannot_answer(Language::German));
    assert_eq!(model.calls(Call::Answer), 0);

    // The user saw the reply, so the exchange is part of the session.
    let session = kic.sessions().get(&response.session_id).await.unwrap();
    assert_eq!(session.lock().await.history.len(), 2);
}

#[tokio::test]
async fn test_generation_failure_cannot_answer() {
    let model = Arc::new(StageModel::new(|call, _| match call {
        Call::Answer => Err(ExternalError::timeout("llm", 60_000)),
        _ => Ok("Doc: 1, Relevance: 8".to_string()),
    }));
    let kic = orchestrator(model, memory_store(neural_corpus()), Options::default());

    let answer = kic
        .chat(
            ChatRequest::new("What is a neural network?", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .answer;
    assert_eq!(answer.kind, AnswerKind::CannotAnswer);
    assert_eq!(answer.text, replies::cannot_answer(Language::English));
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn test_no_answer_found_maps_to_insufficient_information() {
    let model = Arc::new(StageModel::answering("```json\n{\"answer\": \"NO ANSWER FOUND\"}\n```"));
    let kic = orchestrator(model, memory_store(neural_corpus()), Options::default());

    let answer = kic
        .chat(
            ChatRequest::new("What is a neural network?", Scope::general()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .answer;
    assert_eq!(answer.kind, AnswerKind::InsufficientInformation);
    assert_eq!(answer.text, replies::insufficient_information(Language::English));
}

#[tokio::test]
async fn test_contextualizer_failure_uses_raw_query() {
    let model = Arc::new(StageModel::new(|call, _| match call {
        Call::Contextualize => Err(ExternalError::status("llm", 500, "boom")),
        Call::Rerank => Ok("Doc: 1, Relevance: 9".to_string()),
        Call::Answer => Ok("Ja [doc1].".to_string()),
    }));
    let kic = orchestrator(model.clone(), memory_store(neural_corpus()), Options::default());

    let request = ChatRequest::new("Und gibt es ein Zertifikat?", Scope::general()).with_history(vec![
        ChatTurn::user("Was ist ein neural network?"),
        ChatTurn::assistant("Ein Modell aus verbundenen Einheiten."),
    ]);
    let answer = kic.chat(request, CancellationToken::new()).await.unwrap().answer;

    assert_eq!(answer.degraded, vec![Stage::Contextualize]);
    assert_eq!(answer.kind, AnswerKind::Grounded);
    let prompt = model.requests(Call::Answer).remove(0);
    assert!(prompt
        .messages
        .last()
        .unwrap()
        .content
        .starts_with("<QUERY>:\nUnd gibt es ein Zertifikat?\n"));
}

#[tokio::test]
async fn test_contextualized_query_drives_retrieval() {
    let model = Arc::new(StageModel::new(|call, _| match call {
        Call::Contextualize => Ok("Wie bekomme ich ein Zertifikat für den Kurs?".to_string()),
        Call::Rerank => Ok("Doc: 1, Relevance: 9".to_string()),
        Call::Answer => Ok("Nach dem Kurs [doc1].".to_string()),
    }));
    let kic = orchestrator(model.clone(), memory_store(neural_corpus()), Options::default());

    let request = ChatRequest::new("und danach?", Scope::general())
        .with_history(vec![ChatTurn::user("Hallo"), ChatTurn::assistant("Hallo!")]);
    let answer = kic.chat(request, CancellationToken::new()).await.unwrap().answer;

    assert_eq!(answer.citations[0].url, "https://x/3");
    let context_request = model.requests(Call::Contextualize).remove(0);
    assert_eq!(context_request.messages.len(), 3);
    assert!((context_request.temperature - 0.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_gibberish_escalates_on_repeat() {
    let model = Arc::new(StageModel::answering("[doc1]"));
    let kic = orchestrator(model.clone(), memory_store(neural_corpus()), Options::default());

    let first = kic
        .chat(ChatRequest::new("sdfgh", Scope::general()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.answer.kind, AnswerKind::NotUnderstood);
    assert!(replies::is_not_understood(&first.answer.text));

    let second = kic
        .chat(
            ChatRequest::new("qwrtz", Scope::general()).in_session(first.session_id.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(second.answer.kind, AnswerKind::NotUnderstood);
    assert!(second.answer.text.contains("support@ki-campus.org"));

    let in_course = kic
        .chat(
            ChatRequest::new("???", Scope::course(79)).with_history(vec![
                ChatTurn::user("xx"),
                ChatTurn::assistant(replies::not_understood(Language::German)),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(in_course.answer.text.contains("course/view.php?id=79"));

    assert_eq!(model.calls(Call::Answer), 0);
    assert_eq!(model.calls(Call::Contextualize), 0);
}

// ============ Streaming, cancellation, concurrency ============

#[tokio::test]
async fn test_streaming_emits_raw_fragments() {
    let model = Arc::new(StageModel::answering("Ein Modell [doc1]."));
    let kic = orchestrator(model, memory_store(neural_corpus()), Options::default());

    let mut streamed = String::new();
    let mut collect = |fragment: &str| streamed.push_str(fragment);
    let response = kic
        .chat_streaming(
            ChatRequest::new("Was ist ein neural network?", Scope::general()),
            CancellationToken::new(),
            &mut collect as TokenSink,
        )
        .await
        .unwrap();

    assert_eq!(streamed, "Ein Modell [doc1].");
    assert!(response.answer.text.starts_with("Ein Modell [[1]]("));
}

struct SlowModel;

#[async_trait]
impl ChatModel for SlowModel {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ExternalError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late [doc1]".to_string())
    }
}

#[tokio::test]
async fn test_cancelled_turn_leaves_history_untouched() {
    let kic = orchestrator(Arc::new(SlowModel), memory_store(neural_corpus()), Options::default());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let request = ChatRequest::new("What is a neural network?", Scope::general()).in_session("s1");
    let result = kic.chat(request, cancel).await;
    assert!(result.is_err());

    let session = kic.sessions().get("s1").await.unwrap();
    assert!(session.lock().await.history.is_empty());
}

#[tokio::test]
async fn test_turns_on_one_session_are_serialised() {
    let model = Arc::new(StageModel::answering("Antwort [doc1]."));
    let kic = orchestrator(model, memory_store(neural_corpus()), Options::default());

    let a = kic.chat(
        ChatRequest::new("Erste Frage zum neural network", Scope::general()).in_session("shared"),
        CancellationToken::new(),
    );
    let b = kic.chat(
        ChatRequest::new("Zweite Frage zum Zertifikat", Scope::general()).in_session("shared"),
        CancellationToken::new(),
    );
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap().session_id, "shared");
    assert_eq!(b.unwrap().session_id, "shared");

    let session = kic.sessions().get("shared").await.unwrap();
    let turns = session.lock().await.history.to_vec();
    assert_eq!(turns.len(), 4);
    for pair in turns.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn test_stateless_turns_keep_session_count_bounded() {
    let model = Arc::new(StageModel::answering("A neural network [doc1]."));
    let kic = orchestrator(
        model,
        memory_store(neural_corpus()),
        Options {
            max_sessions: 25,
            ..Default::default()
        },
    );

    let mut last = String::new();
    for _ in 0..200 {
        let response = kic
            .chat(
                ChatRequest::new("What is a neural network?", Scope::general()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        last = response.session_id;
    }

    assert_eq!(kic.sessions().len().await, 25);
    // The newest session is still there to be continued.
    assert!(kic.sessions().get(&last).await.is_some());
}
