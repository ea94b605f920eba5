use quizbuzz::protocol::{ClientMessage, ServerMessage};
use quizbuzz::questions::QuestionBank;
use quizbuzz::state::SessionState;
use quizbuzz::types::{AnswerChoice, Question, Role, ScoreEntry, SessionConfig, SessionPhase};
use quizbuzz::ws::handlers::{handle_message, Connection};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A connection plus the channel the coordinator pushes into
struct Client {
    conn: Connection,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Client {
    fn new(role: Role) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            conn: Connection::new(role, tx),
            rx,
        }
    }

    async fn send(&mut self, state: &Arc<SessionState>, msg: ClientMessage) -> Option<ServerMessage> {
        handle_message(msg, &mut self.conn, state).await
    }

    /// Next pushed message that isn't a countdown tick
    async fn next(&mut self) -> ServerMessage {
        loop {
            match self.rx.recv().await.expect("coordinator dropped the channel") {
                ServerMessage::Timer { .. } => continue,
                msg => return msg,
            }
        }
    }
}

fn questions() -> Vec<Question> {
    vec![
        Question {
            prompt: "Largest planet?".to_string(),
            options: ["Mars", "Jupiter", "Venus", "Earth"].map(String::from),
            correct_index: 1,
        },
        Question {
            prompt: "Boiling point of water at sea level (C)?".to_string(),
            options: ["90", "100", "110", "120"].map(String::from),
            correct_index: 1,
        },
    ]
}

fn new_state() -> Arc<SessionState> {
    Arc::new(SessionState::new(
        SessionConfig::default(),
        QuestionBank::new(questions()),
    ))
}

async fn join(state: &Arc<SessionState>, identity: &str) -> Client {
    let mut client = Client::new(Role::Participant);
    let joined = client
        .send(
            state,
            ClientMessage::Join {
                identity: Some(identity.to_string()),
            },
        )
        .await;
    match joined {
        Some(ServerMessage::Joined { identity: id, .. }) => assert_eq!(id, identity),
        other => panic!("Expected Joined message, got {:?}", other),
    }
    client
}

async fn start(state: &Arc<SessionState>) -> Client {
    state.open_lobby().await.unwrap();
    let mut host = Client::new(Role::Host);
    let started = host.send(state, ClientMessage::HostStart).await;
    assert!(
        matches!(started, Some(ServerMessage::Phase { .. })),
        "Expected Phase message, got {:?}",
        started
    );
    host
}

async fn expect_question(client: &mut Client, round: u32) {
    match client.next().await {
        ServerMessage::Question { round_no, question, .. } => {
            assert_eq!(round_no, round);
            assert_eq!(question.options.len(), 4);
        }
        other => panic!("Expected Question message, got {:?}", other),
    }
}

/// End-to-end integration test for a complete session
#[tokio::test(start_paused = true)]
async fn test_full_session_flow() {
    let state = new_state();

    // 1. Three participants join
    let mut a = join(&state, "alice").await;
    let mut b = join(&state, "bob").await;
    let mut c = join(&state, "carol").await;
    assert_eq!(state.registry.len().await, 3);

    // 2. Operator starts; everyone is notified and gets question 1
    let mut host = start(&state).await;
    for client in [&mut a, &mut b, &mut c] {
        assert_eq!(client.next().await, ServerMessage::SessionStarted);
        expect_question(client, 1).await;
    }

    // 3. Bob's buzz arrives first, then Alice, then Carol
    assert!(b.send(&state, ClientMessage::Buzz).await.is_none());
    assert!(a.send(&state, ClientMessage::Buzz).await.is_none());
    assert!(c.send(&state, ClientMessage::Buzz).await.is_none());

    // 4. Poll window closes: Bob is accepted, the others rejected
    assert_eq!(b.next().await, ServerMessage::Accept { round_no: 1 });
    assert_eq!(a.next().await, ServerMessage::Reject { round_no: 1 });
    assert_eq!(c.next().await, ServerMessage::Reject { round_no: 1 });
    assert_eq!(state.phase().await, SessionPhase::AnswerWindow);

    // Alice answering out of turn changes nothing
    assert!(a
        .send(
            &state,
            ClientMessage::Answer {
                option: AnswerChoice::Index(1)
            }
        )
        .await
        .is_none());

    // 5. Bob answers correctly by option text
    let response = b
        .send(
            &state,
            ClientMessage::Answer {
                option: AnswerChoice::Text("Jupiter".to_string()),
            },
        )
        .await;
    assert!(response.is_none());
    assert_eq!(b.next().await, ServerMessage::Correct { score: 10 });

    // A second answer in the same round does not score twice
    b.send(
        &state,
        ClientMessage::Answer {
            option: AnswerChoice::Index(1),
        },
    )
    .await;
    assert_eq!(state.ledger.score("bob").await, 10);
    assert_eq!(state.ledger.score("alice").await, 0);

    // 6. Round 2 starts immediately; nobody buzzes
    for client in [&mut a, &mut b, &mut c] {
        expect_question(client, 2).await;
    }
    // Timeout carries each participant's running total
    for (client, total) in [(&mut a, 0), (&mut b, 10), (&mut c, 0)] {
        assert_eq!(client.next().await, ServerMessage::Timeout { score: total });
    }

    // 7. Queue exhausted: everyone gets the final ledger
    let expected = vec![
        ScoreEntry {
            identity: "bob".to_string(),
            score: 10,
        },
        ScoreEntry {
            identity: "alice".to_string(),
            score: 0,
        },
        ScoreEntry {
            identity: "carol".to_string(),
            score: 0,
        },
    ];
    for client in [&mut a, &mut b, &mut c] {
        assert_eq!(
            client.next().await,
            ServerMessage::SessionOver {
                final_scores: expected.clone()
            }
        );
    }
    assert_eq!(state.phase().await, SessionPhase::GameOver);

    let scores = host.send(&state, ClientMessage::HostGetScores).await;
    assert_eq!(scores, Some(ServerMessage::Scores { scores: expected }));
}

#[tokio::test(start_paused = true)]
async fn test_resolution_follows_arrival_order() {
    let state = new_state();
    let mut a = join(&state, "alice").await;
    let mut b = join(&state, "bob").await;
    let mut c = join(&state, "carol").await;
    start(&state).await;

    // Carol, then Alice, then Bob; Carol buzzes twice
    c.send(&state, ClientMessage::Buzz).await;
    a.send(&state, ClientMessage::Buzz).await;
    c.send(&state, ClientMessage::Buzz).await;
    b.send(&state, ClientMessage::Buzz).await;

    let pending: Vec<String> = state
        .arbiter
        .pending()
        .await
        .into_iter()
        .map(|s| s.participant)
        .collect();
    assert_eq!(pending, vec!["carol", "alice", "bob"]);

    for client in [&mut a, &mut b, &mut c] {
        client.next().await; // SessionStarted
        client.next().await; // Question
    }
    assert_eq!(c.next().await, ServerMessage::Accept { round_no: 1 });
    assert_eq!(a.next().await, ServerMessage::Reject { round_no: 1 });
    assert_eq!(b.next().await, ServerMessage::Reject { round_no: 1 });

    let round = state.current_round().await.unwrap();
    assert_eq!(round.accepted_participant.as_deref(), Some("carol"));
    assert!(round.flags["carol"].received_accept);
    assert!(!round.flags["alice"].received_accept);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_answer_and_answer_timeout() {
    let state = new_state();
    let mut a = join(&state, "alice").await;
    start(&state).await;
    a.next().await; // SessionStarted
    expect_question(&mut a, 1).await;

    a.send(&state, ClientMessage::Buzz).await;
    assert_eq!(a.next().await, ServerMessage::Accept { round_no: 1 });

    // An option that does not exist is refused and can be corrected
    let refused = a
        .send(
            &state,
            ClientMessage::Answer {
                option: AnswerChoice::Index(7),
            },
        )
        .await;
    assert!(matches!(
        refused,
        Some(ServerMessage::Error { ref code, .. }) if code == "INVALID_OPTION"
    ));

    a.send(
        &state,
        ClientMessage::Answer {
            option: AnswerChoice::Index(0),
        },
    )
    .await;
    assert_eq!(
        a.next().await,
        ServerMessage::Incorrect {
            score: -10,
            correct_option: "Jupiter".to_string()
        }
    );

    // Round 2: accepted but silent until the answer window lapses
    expect_question(&mut a, 2).await;
    a.send(&state, ClientMessage::Buzz).await;
    assert_eq!(a.next().await, ServerMessage::Accept { round_no: 2 });
    assert_eq!(a.next().await, ServerMessage::Timeout { score: -20 });
    assert!(matches!(a.next().await, ServerMessage::SessionOver { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_round_does_not_stall() {
    let state = new_state();
    let mut a = join(&state, "alice").await;
    let b = join(&state, "bob").await;
    let mut c = join(&state, "carol").await;
    start(&state).await;

    a.send(&state, ClientMessage::Buzz).await;
    c.send(&state, ClientMessage::Buzz).await;

    // Bob's connection goes away without a word
    let bob = b.conn.participant.clone().unwrap();
    drop(b);
    state.leave(&bob).await;

    a.next().await; // SessionStarted
    expect_question(&mut a, 1).await;
    assert_eq!(a.next().await, ServerMessage::Accept { round_no: 1 });
    a.send(
        &state,
        ClientMessage::Answer {
            option: AnswerChoice::Index(1),
        },
    )
    .await;
    assert_eq!(a.next().await, ServerMessage::Correct { score: 10 });

    // Bob is not part of round 2
    expect_question(&mut a, 2).await;
    let round = state.current_round().await.unwrap();
    assert_eq!(round.number, 2);
    assert!(!round.flags.contains_key("bob"));

    let mut saw_over = false;
    while let Some(msg) = c.rx.recv().await {
        if matches!(msg, ServerMessage::SessionOver { .. }) {
            saw_over = true;
            break;
        }
    }
    assert!(saw_over);
}

#[tokio::test(start_paused = true)]
async fn test_host_kick_mid_round() {
    let state = new_state();
    let mut a = join(&state, "alice").await;
    let mut m = join(&state, "mallory").await;
    let mut host = start(&state).await;

    m.send(&state, ClientMessage::Buzz).await;
    let result = host
        .send(
            &state,
            ClientMessage::HostKick {
                identity: "mallory".to_string(),
            },
        )
        .await;
    assert_eq!(
        result,
        Some(ServerMessage::Roster {
            participants: vec!["alice".to_string()]
        })
    );

    m.next().await; // SessionStarted
    m.next().await; // Question
    assert!(matches!(m.next().await, ServerMessage::Kicked { .. }));

    // The round carries on; mallory still won the race but never answers
    a.next().await; // SessionStarted
    expect_question(&mut a, 1).await;
    expect_question(&mut a, 2).await;
    assert_eq!(state.ledger.score("mallory").await, -10);
    let round = state.current_round().await.unwrap();
    assert_eq!(round.number, 2);
    assert!(!round.flags.contains_key("mallory"));
}

#[tokio::test]
async fn test_host_stop_ends_session() {
    let state = new_state();
    let mut a = join(&state, "alice").await;
    let mut host = start(&state).await;

    let result = host.send(&state, ClientMessage::HostStop).await;
    assert!(matches!(
        result,
        Some(ServerMessage::Phase {
            phase: SessionPhase::GameOver,
            ..
        })
    ));

    assert_eq!(a.next().await, ServerMessage::SessionStarted);
    expect_question(&mut a, 1).await;
    assert!(matches!(a.next().await, ServerMessage::SessionOver { .. }));

    // Nothing is accepted any more
    a.send(&state, ClientMessage::Buzz).await;
    assert!(state.arbiter.pending().await.is_empty());
    assert_eq!(state.questions_remaining().await, 1);
}

#[tokio::test]
async fn test_unauthorized_host_commands() {
    let state = new_state();
    let mut a = join(&state, "alice").await;
    state.open_lobby().await.unwrap();

    for msg in [
        ClientMessage::HostStart,
        ClientMessage::HostStop,
        ClientMessage::HostGetScores,
        ClientMessage::HostKick {
            identity: "alice".to_string(),
        },
    ] {
        let result = a.send(&state, msg).await;
        assert!(matches!(
            result,
            Some(ServerMessage::Error { ref code, .. }) if code == "UNAUTHORIZED"
        ));
    }
    assert_eq!(state.phase().await, SessionPhase::AwaitStart);
    assert_eq!(state.registry.len().await, 1);
}

#[tokio::test]
async fn test_host_sees_phase_changes_and_race() {
    let state = new_state();
    let mut host_rx = state.subscribe_host();
    let _a = join(&state, "alice").await;

    state.open_lobby().await.unwrap();
    state.start_session().await.unwrap();

    let mut phases = Vec::new();
    while let Ok(msg) = host_rx.try_recv() {
        if let ServerMessage::Phase { phase, .. } = msg {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            SessionPhase::AwaitStart,
            SessionPhase::Broadcast,
            SessionPhase::PollWindow
        ]
    );
    assert_eq!(state.get_session().await.version, 4);
}
