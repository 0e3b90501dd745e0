use async_trait::async_trait;
use evoclaw_chat::llm::Completion;
use evoclaw_chat::market::{ClearinghouseState, MarketData};
use evoclaw_chat::modules::{AiModule, HelpModule, TradingModule};
use evoclaw_chat::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Hand-written module: matches via `predicate`, answers with `reply` or fails
struct FakeModule {
    descriptor: ModuleDescriptor,
    predicate: Predicate,
    reply: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FakeModule {
    fn new(name: &str, priority: i32, predicate: Predicate, reply: Option<&str>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(name, format!("{name} module"), priority),
            predicate,
            reply: reply.map(str::to_string),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn answering(name: &str, priority: i32) -> Self {
        let reply = format!("{name} says hi");
        Self::new(name, priority, Box::new(|_: &str| true), Some(reply.as_str()))
    }

    fn failing(name: &str, priority: i32) -> Self {
        Self::new(name, priority, Box::new(|_: &str| true), None)
    }

    fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl CapabilityModule for FakeModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, text: &str, _ctx: &ConversationContext) -> Result<bool, ModuleError> {
        Ok((self.predicate)(text))
    }

    async fn handle(&self, _text: &str, _ctx: &ConversationContext) -> Result<String, ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| ModuleError::Other("upstream exploded at line 42".to_string()))
    }
}

fn router_with(modules: Vec<FakeModule>) -> Router {
    let mut registry = ModuleRegistry::new();
    for module in modules {
        registry.register(Box::new(module)).unwrap();
    }
    Router::new(registry)
}

/// Lowest priority value wins when every module matches
#[tokio::test]
async fn test_priority_ordering() {
    let ai = FakeModule::answering("ai", 50);
    let help = FakeModule::answering("help", 20);
    let trading = FakeModule::answering("trading", 10);
    let counters = [trading.calls(), help.calls(), ai.calls()];

    // Registered out of priority order on purpose
    let router = router_with(vec![ai, help, trading]);
    let mut ctx = ConversationContext::new("chat", "user");
    let reply = router.handle_message("anything", &mut ctx).await;

    assert_eq!(reply, "trading says hi");
    let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(calls, vec![1, 0, 0]);
}

/// Equal priority: the module registered first is tried first
#[tokio::test]
async fn test_stable_tie_break() {
    let router = router_with(vec![
        FakeModule::answering("first", 5),
        FakeModule::answering("second", 5),
    ]);
    let mut ctx = ConversationContext::new("chat", "user");
    let dispatch = router.dispatch("x", &mut ctx).await;
    assert_eq!(dispatch.handled_by.as_deref(), Some("first"));

    let names: Vec<String> = router.descriptors().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["first", "second"]);
}

/// Only one module's answer is returned even when several match
#[tokio::test]
async fn test_first_match_wins() {
    let a = FakeModule::answering("a", 1);
    let b = FakeModule::answering("b", 2);
    let b_calls = b.calls();
    let router = router_with(vec![a, b]);

    let mut ctx = ConversationContext::new("chat", "user");
    for _ in 0..3 {
        assert_eq!(router.handle_message("hi", &mut ctx).await, "a says hi");
    }
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.history().len(), 6);
}

/// No matching module gives the exact fallback text every time
#[tokio::test]
async fn test_fallback_determinism() {
    let router = router_with(vec![FakeModule::new(
        "never",
        1,
        Box::new(|_: &str| false),
        Some("unreachable"),
    )]);

    let mut ctx = ConversationContext::new("chat", "user");
    let first = router.handle_message("unknown", &mut ctx).await;
    let second = router.handle_message("other", &mut ctx).await;
    assert_eq!(first, FALLBACK_RESPONSE);
    assert_eq!(second, FALLBACK_RESPONSE);
}

/// A failing handler yields the fallback, not an error, and its error text stays private
#[tokio::test]
async fn test_failure_fallthrough() {
    let router = router_with(vec![FakeModule::failing("broken", 1)]);
    let mut ctx = ConversationContext::new("chat", "user");

    let dispatch = router.dispatch("hello", &mut ctx).await;
    assert!(dispatch.is_fallback());
    assert_eq!(dispatch.response, FALLBACK_RESPONSE);
    assert!(!dispatch.response.contains("exploded"));
    assert_eq!(dispatch.failures.len(), 1);
    assert_eq!(dispatch.failures[0].module, "broken");
}

/// A failing module is skipped in favour of the next matching one
#[tokio::test]
async fn test_failure_falls_through_to_next_candidate() {
    let router = router_with(vec![
        FakeModule::failing("broken", 1),
        FakeModule::answering("backup", 2),
    ]);
    let mut ctx = ConversationContext::new("chat", "user");
    assert_eq!(router.handle_message("hi", &mut ctx).await, "backup says hi");
}

/// 25 calls against a bound of 20 keep only the newest 20 messages, in order
#[tokio::test]
async fn test_history_bound() {
    let router = Router::new(ModuleRegistry::new()).with_max_history(20);
    assert_eq!(router.max_history(), 20);

    let mut ctx = ConversationContext::new("chat", "user");
    for i in 0..25 {
        router.handle_message(&format!("msg {i}"), &mut ctx).await;
        assert!(ctx.history().len() <= 20);
    }
    assert_eq!(ctx.history().len(), 20);

    // Each call adds a user turn and a fallback turn; the newest 10 pairs survive
    let users: Vec<&str> = ctx
        .history()
        .iter()
        .filter(|m| m.role() == Role::User)
        .map(|m| m.content())
        .collect();
    let expected: Vec<String> = (15..25).map(|i| format!("msg {i}")).collect();
    assert_eq!(users, expected);
    assert!(!users.contains(&"msg 0"));
    assert_eq!(ctx.history()[0].role(), Role::User);
}

/// One call appends exactly a user entry then an assistant entry
#[tokio::test]
async fn test_round_trip_of_a_turn() {
    let router = router_with(vec![FakeModule::new(
        "pong",
        1,
        Box::new(|t: &str| t == "ping"),
        Some("pong"),
    )]);
    let mut ctx = ConversationContext::new("chat", "user");
    let before = chrono::Utc::now();

    let reply = router.handle_message("ping", &mut ctx).await;

    assert_eq!(ctx.history().len(), 2);
    let user = &ctx.history()[0];
    let assistant = &ctx.history()[1];
    assert_eq!(user.role(), Role::User);
    assert_eq!(user.content(), "ping");
    assert_eq!(assistant.role(), Role::Assistant);
    assert_eq!(assistant.content(), reply);
    assert!(user.timestamp() >= before);
    assert!(assistant.timestamp() >= user.timestamp());
}

/// Predicates answer the same way twice and never touch the context
#[tokio::test]
async fn test_idempotent_predicate() {
    let trading = TradingModule::new(Arc::new(StaticMarket), None);
    let help = HelpModule::new();
    let ctx = ConversationContext::new("chat", "user");

    for module in [&trading as &dyn CapabilityModule, &help] {
        for text in ["/position", "/help", "hello", ""] {
            let first = module.can_handle(text, &ctx).unwrap();
            let second = module.can_handle(text, &ctx).unwrap();
            assert_eq!(first, second);
        }
    }
    assert!(ctx.history().is_empty());
    assert!(ctx.metadata().is_empty());
}

/// Trading at 10, Help at 20, catch-all Fallback at 50
#[tokio::test]
async fn test_concrete_scenario() {
    let router = router_with(vec![
        FakeModule::new(
            "Fallback",
            50,
            Box::new(|_: &str| true),
            Some("I can chat about anything."),
        ),
        FakeModule::new("Help", 20, Box::new(|t: &str| t == "/help"), Some("help text")),
        FakeModule::new(
            "Trading",
            10,
            Box::new(|t: &str| t == "/position"),
            Some("no positions"),
        ),
    ]);

    let cases = [
        ("/position", "Trading"),
        ("/help", "Help"),
        ("hello", "Fallback"),
        ("", "Fallback"),
    ];
    for (text, expected) in cases {
        let mut ctx = ConversationContext::new("chat", "user");
        let dispatch = router.dispatch(text, &mut ctx).await;
        assert_eq!(dispatch.handled_by.as_deref(), Some(expected), "{text:?}");
        assert!(!dispatch.response.is_empty());
    }
}

/// Registration rejects a duplicate name instead of silently shadowing
#[test]
fn test_duplicate_registration_fails_loudly() {
    let mut router = Router::default();
    router
        .register(Box::new(FakeModule::answering("dup", 1)))
        .unwrap();
    let err = router
        .register(Box::new(FakeModule::answering("dup", 2)))
        .unwrap_err();
    assert_eq!(err, RegistryError::DuplicateName("dup".to_string()));
}

struct StaticMarket;

#[async_trait]
impl MarketData for StaticMarket {
    async fn account(&self, _wallet: &str) -> Result<ClearinghouseState, CollaboratorError> {
        Ok(serde_json::from_value(serde_json::json!({
            "assetPositions": [{"type": "oneWay", "position": {
                "coin": "SOL", "szi": "10", "entryPx": "150",
                "positionValue": "1600", "unrealizedPnl": "100", "returnOnEquity": "0.06"
            }}],
            "marginSummary": {"accountValue": "5000", "totalMarginUsed": "400"}
        }))?)
    }

    async fn mids(&self) -> Result<HashMap<String, f64>, CollaboratorError> {
        Ok(HashMap::from([("SOL".to_string(), 160.25)]))
    }
}

struct EchoCompletion;

#[async_trait]
impl Completion for EchoCompletion {
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[ConversationMessage],
    ) -> Result<String, CollaboratorError> {
        let last = messages.last().map(|m| m.content()).unwrap_or_default();
        Ok(format!("echo: {last} ({} turns)", messages.len()))
    }
}

fn production_router() -> Arc<Router> {
    let mut registry = ModuleRegistry::new();
    let modules: Vec<Box<dyn CapabilityModule>> = vec![
        Box::new(AiModule::new(Arc::new(EchoCompletion), None)),
        Box::new(HelpModule::new()),
        Box::new(TradingModule::new(
            Arc::new(StaticMarket),
            Some("0x1234567890abcdef1234567890abcdef12345678".to_string()),
        )),
    ];
    registry.register_all(modules).unwrap();
    Arc::new(Router::new(registry))
}

/// Real modules behind the store: commands, help listing and AI conversation
#[tokio::test]
async fn test_real_modules_through_store() {
    let router = production_router();
    let store = ContextStore::new(10, None).with_router(Arc::downgrade(&router));
    let ctx = store.get_or_create("42", "7").await;
    let mut ctx = ctx.lock().await;

    let position = router.dispatch("/position", &mut ctx).await;
    assert_eq!(position.handled_by.as_deref(), Some("Trading"));
    assert!(position.response.contains("SOL LONG 10"));

    let price = router.handle_message("/price sol", &mut ctx).await;
    assert_eq!(price, "SOL mid price: $160.2500");

    let help = router.handle_message("/help", &mut ctx).await;
    assert!(help.contains("Trading"));
    assert!(help.contains("AI"));

    let chat = router.handle_message("how are you?", &mut ctx).await;
    assert_eq!(chat, "echo: how are you? (7 turns)");

    let empty = router.dispatch("", &mut ctx).await;
    assert_eq!(empty.handled_by.as_deref(), Some("AI"));
    assert!(!empty.response.is_empty());
}

/// Unknown coin makes Trading fail; the AI module answers instead
#[tokio::test]
async fn test_trading_failure_falls_through_to_ai() {
    let router = production_router();
    let mut ctx = ConversationContext::new("chat", "user");
    let dispatch = router.dispatch("/price DOGE", &mut ctx).await;
    assert_eq!(dispatch.handled_by.as_deref(), Some("AI"));
    assert_eq!(dispatch.failures.len(), 1);
    assert_eq!(dispatch.failures[0].module, "Trading");
}

/// Concurrent messages for one conversation are serialised by its lock
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_conversation_is_serialised() {
    let router = production_router();
    let store = Arc::new(ContextStore::new(10, None));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let router = router.clone();
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = store.get_or_create("shared", "user").await;
            let mut ctx = ctx.lock().await;
            router.handle_message(&format!("message {i}"), &mut ctx).await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ctx = store.get("shared").await.unwrap();
    let ctx = ctx.lock().await;
    assert_eq!(ctx.history().len(), 16);
    for pair in ctx.history().iter().collect::<Vec<_>>().chunks(2) {
        assert_eq!(pair[0].role(), Role::User);
        assert_eq!(pair[1].role(), Role::Assistant);
        assert!(pair[1].content().contains(pair[0].content()));
    }
}
