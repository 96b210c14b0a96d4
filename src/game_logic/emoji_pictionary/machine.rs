use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use uuid::Uuid;

use crate::content::EmojiPrompt;
use crate::game_logic::GameOutcome;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TeamColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Pink,
    Teal,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Team {
    pub name: String,
    pub color: TeamColor,
    pub score: i32,
    pub is_locked_out: bool,
}

/// Record of the buzz that won arbitration for the current prompt. The
/// timestamp is server receipt time; client clocks are never consulted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BuzzEvent {
    pub team_name: String,
    pub server_timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum SessionStatus {
    Setup,
    Active,
    VerdictPending { responder: String },
    Finished { outcome: GameOutcome },
}

/// Per-session rule set, fixed at session creation from configuration.
/// `total_rounds` and `round_seconds` may still be adjusted during setup.
#[derive(Debug, Clone, Copy)]
pub struct SessionRules {
    pub correct_points: i32,
    pub incorrect_penalty: i32,
    pub round_seconds: u32,
    pub total_rounds: u32,
    pub min_teams: usize,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SetupError {
    #[error("At least {required} teams are required to start (have {actual})")]
    NotEnoughTeams { required: usize, actual: usize },
    #[error("Team name cannot be empty")]
    BlankTeamName,
    #[error("A team named '{0}' already exists")]
    DuplicateTeamName(String),
    #[error("No team named '{0}'")]
    UnknownTeam(String),
    #[error("The prompt deck is empty")]
    EmptyDeck,
    #[error("Only allowed during setup")]
    NotInSetup,
}

/// Result of a buzz attempt. Only `Won` is an accepted buzz; every other
/// outcome leaves the session untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum BuzzOutcome {
    /// First valid buzz for the open prompt; team is now the active responder.
    Won,
    /// Buzzer already claimed for this prompt, awaiting a verdict.
    TooLate,
    /// Team is locked out for the remainder of this prompt.
    LockedOut,
    /// No prompt is open (setup, finished).
    Closed,
    UnknownTeam,
}

impl BuzzOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, BuzzOutcome::Won)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VerdictError {
    #[error("Out-of-turn verdict: active responder is {active_responder:?}")]
    OutOfTurn { active_responder: Option<String> },
}

/// What a successfully applied verdict did to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictOutcome {
    pub is_correct: bool,
    /// An incorrect verdict locked out the last remaining team, so the prompt
    /// was abandoned with no further score change.
    pub prompt_abandoned: bool,
    pub finished: Option<GameOutcome>,
}

/// What a single clock tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Clock not running; nothing happened.
    Idle,
    Ticked {
        seconds_left: u32,
    },
    /// Countdown hit zero and the round was resolved without a correct
    /// verdict: no score change, round advanced (or game finished).
    Expired {
        finished: Option<GameOutcome>,
    },
}

/// Countdown clock for one prompt. Monotonic, clamps at zero, and expiry
/// fires exactly once per `start`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoundClock {
    pub seconds_left: u32,
    #[serde(skip)]
    running: bool,
}

impl RoundClock {
    fn new() -> Self {
        Self {
            seconds_left: 0,
            running: false,
        }
    }

    fn start(&mut self, duration_seconds: u32) {
        self.seconds_left = duration_seconds;
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
        self.seconds_left = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Decrements by one second. Returns `true` exactly once, on the tick
    /// that reaches zero; ticking a stopped or expired clock is a no-op.
    fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.seconds_left = self.seconds_left.saturating_sub(1);
        if self.seconds_left == 0 {
            self.running = false;
            return true;
        }
        false
    }
}

/// Authoritative state of one emoji-pictionary session. Pure state: no I/O,
/// no channels, no tasks. The engine owns one of these behind the session
/// actor, so every mutation arrives in mailbox (FIFO) order. That arrival
/// order is the arbitration order, never client timestamps.
///
/// Serializes directly as the snapshot broadcast to every viewer.
#[derive(Serialize, Debug, Clone)]
pub struct SessionMachine {
    pub id: Uuid,
    pub name: String,
    pub round: u32,
    pub total_rounds: u32,
    pub current_prompt: String,
    pub current_answer: String,
    #[serde(flatten)]
    clock: RoundClock,
    pub teams: Vec<Team>,
    pub locked_out_teams: BTreeSet<String>,
    pub status: SessionStatus,
    pub sudden_death: bool,
    pub current_buzz: Option<BuzzEvent>,

    #[serde(skip)]
    rules: SessionRules,
    #[serde(skip)]
    prompts: Vec<EmojiPrompt>,
    #[serde(skip)]
    used_prompts: HashSet<String>,
    #[serde(skip)]
    prompt_serial: u64,
}

impl SessionMachine {
    pub fn new(id: Uuid, name: String, rules: SessionRules, prompts: Vec<EmojiPrompt>) -> Self {
        Self {
            id,
            name,
            round: 1,
            total_rounds: rules.total_rounds,
            current_prompt: String::new(),
            current_answer: String::new(),
            clock: RoundClock::new(),
            teams: Vec::new(),
            locked_out_teams: BTreeSet::new(),
            status: SessionStatus::Setup,
            sudden_death: false,
            current_buzz: None,
            rules,
            prompts,
            used_prompts: HashSet::new(),
            prompt_serial: 0,
        }
    }

    pub fn seconds_left(&self) -> u32 {
        self.clock.seconds_left
    }

    pub fn clock_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Serial of the prompt currently open. Bumped on every prompt
    /// transition so expiry events for superseded prompts can be discarded.
    pub fn prompt_serial(&self) -> u64 {
        self.prompt_serial
    }

    pub fn team(&self, name: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.name == name)
    }

    fn team_mut(&mut self, name: &str) -> Option<&mut Team> {
        self.teams.iter_mut().find(|t| t.name == name)
    }

    // --- setup ---

    pub fn add_team(&mut self, name: &str, color: TeamColor) -> Result<(), SetupError> {
        if self.status != SessionStatus::Setup {
            return Err(SetupError::NotInSetup);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SetupError::BlankTeamName);
        }
        if self.team(name).is_some() {
            return Err(SetupError::DuplicateTeamName(name.to_string()));
        }
        self.teams.push(Team {
            name: name.to_string(),
            color,
            score: 0,
            is_locked_out: false,
        });
        Ok(())
    }

    pub fn remove_team(&mut self, name: &str) -> Result<(), SetupError> {
        if self.status != SessionStatus::Setup {
            return Err(SetupError::NotInSetup);
        }
        let before = self.teams.len();
        self.teams.retain(|t| t.name != name);
        if self.teams.len() == before {
            return Err(SetupError::UnknownTeam(name.to_string()));
        }
        Ok(())
    }

    pub fn set_total_rounds(&mut self, rounds: u32) {
        if self.status == SessionStatus::Setup && rounds >= 1 {
            self.total_rounds = rounds;
        }
    }

    pub fn set_round_seconds(&mut self, seconds: u32) {
        if self.status == SessionStatus::Setup && seconds >= 1 {
            self.rules.round_seconds = seconds;
        }
    }

    /// `setup -> active`. Validation happens before any state mutation.
    pub fn start(&mut self) -> Result<(), SetupError> {
        if self.status != SessionStatus::Setup {
            return Err(SetupError::NotInSetup);
        }
        if self.teams.len() < self.rules.min_teams {
            return Err(SetupError::NotEnoughTeams {
                required: self.rules.min_teams,
                actual: self.teams.len(),
            });
        }
        if self.prompts.is_empty() {
            return Err(SetupError::EmptyDeck);
        }
        self.round = 1;
        self.sudden_death = false;
        self.status = SessionStatus::Active;
        self.open_next_prompt();
        Ok(())
    }

    /// Back to setup: scores zeroed, teams kept.
    pub fn reset(&mut self) {
        self.status = SessionStatus::Setup;
        self.round = 1;
        self.sudden_death = false;
        self.current_prompt.clear();
        self.current_answer.clear();
        self.current_buzz = None;
        self.clear_lockouts();
        self.used_prompts.clear();
        self.clock.stop();
        for team in &mut self.teams {
            team.score = 0;
        }
    }

    // --- buzzer arbitration ---

    /// Resolves one buzz attempt. The first valid (non-locked-out) buzz per
    /// open prompt wins and closes the buzzer; everything else is rejected
    /// without touching any state.
    pub fn buzz(&mut self, team_name: &str) -> BuzzOutcome {
        match &self.status {
            SessionStatus::Setup | SessionStatus::Finished { .. } => return BuzzOutcome::Closed,
            SessionStatus::VerdictPending { .. } => return BuzzOutcome::TooLate,
            SessionStatus::Active => {}
        }
        if self.team(team_name).is_none() {
            return BuzzOutcome::UnknownTeam;
        }
        if self.locked_out_teams.contains(team_name) {
            return BuzzOutcome::LockedOut;
        }
        self.current_buzz = Some(BuzzEvent {
            team_name: team_name.to_string(),
            server_timestamp: Utc::now(),
        });
        self.status = SessionStatus::VerdictPending {
            responder: team_name.to_string(),
        };
        BuzzOutcome::Won
    }

    pub fn active_responder(&self) -> Option<&str> {
        match &self.status {
            SessionStatus::VerdictPending { responder } => Some(responder.as_str()),
            _ => None,
        }
    }

    // --- verdicts ---

    pub fn apply_verdict(
        &mut self,
        team_name: &str,
        is_correct: bool,
    ) -> Result<VerdictOutcome, VerdictError> {
        let responder = match &self.status {
            SessionStatus::VerdictPending { responder } => responder.clone(),
            _ => {
                return Err(VerdictError::OutOfTurn {
                    active_responder: None,
                });
            }
        };
        if responder != team_name {
            return Err(VerdictError::OutOfTurn {
                active_responder: Some(responder),
            });
        }

        if is_correct {
            let points = self.rules.correct_points;
            if let Some(team) = self.team_mut(&responder) {
                team.score += points;
            }
            let finished = self.resolve_round();
            Ok(VerdictOutcome {
                is_correct: true,
                prompt_abandoned: false,
                finished,
            })
        } else {
            let penalty = self.rules.incorrect_penalty;
            if let Some(team) = self.team_mut(&responder) {
                team.score -= penalty;
                team.is_locked_out = true;
            }
            self.locked_out_teams.insert(responder);
            self.current_buzz = None;

            if self.locked_out_teams.len() >= self.teams.len() {
                // Everyone is locked out: the prompt is abandoned.
                let finished = self.resolve_round();
                Ok(VerdictOutcome {
                    is_correct: false,
                    prompt_abandoned: true,
                    finished,
                })
            } else {
                // Buzzer reopens for the remaining teams.
                self.status = SessionStatus::Active;
                Ok(VerdictOutcome {
                    is_correct: false,
                    prompt_abandoned: false,
                    finished: None,
                })
            }
        }
    }

    // --- round clock ---

    /// One second of countdown. Expiry resolves the round with no score
    /// change, exactly once per prompt.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.clock.is_running() {
            return TickOutcome::Idle;
        }
        let serial = self.prompt_serial;
        if self.clock.tick() {
            match self.handle_expiry(serial) {
                Some(finished) => TickOutcome::Expired { finished },
                // Stale expiry, discarded.
                None => TickOutcome::Idle,
            }
        } else {
            TickOutcome::Ticked {
                seconds_left: self.clock.seconds_left,
            }
        }
    }

    /// Applies a clock expiry for the given prompt serial. Expiries for a
    /// superseded prompt are discarded (`None`, no state effect); the outer
    /// `Option<GameOutcome>` of `Some` is the end-game summary if the expiry
    /// finished the game.
    pub fn handle_expiry(&mut self, prompt_serial: u64) -> Option<Option<GameOutcome>> {
        if prompt_serial != self.prompt_serial {
            return None;
        }
        match self.status {
            SessionStatus::Active | SessionStatus::VerdictPending { .. } => {
                Some(self.resolve_round())
            }
            _ => None,
        }
    }

    // --- round progression ---

    /// Closes out the current prompt and advances: next round, sudden death,
    /// or finished. Round numbers only ever increase.
    fn resolve_round(&mut self) -> Option<GameOutcome> {
        self.clear_lockouts();
        self.current_buzz = None;

        if self.round >= self.total_rounds {
            if let Some(winner) = self.unique_leader() {
                let outcome = GameOutcome::EmojiPictionary {
                    winner: Some(winner),
                    is_tie: false,
                };
                self.clock.stop();
                self.current_prompt.clear();
                self.current_answer.clear();
                self.status = SessionStatus::Finished {
                    outcome: outcome.clone(),
                };
                return Some(outcome);
            }
            // Tied at the top: single-prompt overtime rounds until a sole
            // leader emerges.
            self.sudden_death = true;
        }
        self.round += 1;
        self.status = SessionStatus::Active;
        self.open_next_prompt();
        None
    }

    fn unique_leader(&self) -> Option<String> {
        let top = self.teams.iter().map(|t| t.score).max()?;
        let mut leaders = self.teams.iter().filter(|t| t.score == top);
        let first = leaders.next()?;
        if leaders.next().is_some() {
            None
        } else {
            Some(first.name.clone())
        }
    }

    fn clear_lockouts(&mut self) {
        self.locked_out_teams.clear();
        for team in &mut self.teams {
            team.is_locked_out = false;
        }
    }

    fn open_next_prompt(&mut self) {
        if let Some(prompt) = self.draw_prompt() {
            self.current_prompt = prompt.emoji;
            self.current_answer = prompt.answer;
        }
        self.prompt_serial += 1;
        self.clock.start(self.rules.round_seconds);
    }

    fn draw_prompt(&mut self) -> Option<EmojiPrompt> {
        let available: Vec<&EmojiPrompt> = self
            .prompts
            .iter()
            .filter(|p| !self.used_prompts.contains(&p.emoji))
            .collect();

        let drawn = if available.is_empty() {
            // Deck exhausted: recycle it rather than stalling the game.
            self.used_prompts.clear();
            self.prompts.choose(&mut thread_rng()).cloned()
        } else {
            available.choose(&mut thread_rng()).copied().cloned()
        };

        if let Some(ref prompt) = drawn {
            self.used_prompts.insert(prompt.emoji.clone());
        }
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rules() -> SessionRules {
        SessionRules {
            correct_points: 1,
            incorrect_penalty: 1,
            round_seconds: 30,
            total_rounds: 10,
            min_teams: 2,
        }
    }

    fn test_prompts() -> Vec<EmojiPrompt> {
        vec![
            EmojiPrompt {
                emoji: "🐝🎬".to_string(),
                answer: "Bee Movie".to_string(),
                category: None,
            },
            EmojiPrompt {
                emoji: "🌧️👨".to_string(),
                answer: "Rain Man".to_string(),
                category: None,
            },
            EmojiPrompt {
                emoji: "👑🦁".to_string(),
                answer: "The Lion King".to_string(),
                category: None,
            },
        ]
    }

    fn three_team_machine() -> SessionMachine {
        let mut machine = SessionMachine::new(
            Uuid::new_v4(),
            "Friday Social".to_string(),
            test_rules(),
            test_prompts(),
        );
        machine.add_team("Red", TeamColor::Red).unwrap();
        machine.add_team("Blue", TeamColor::Blue).unwrap();
        machine.add_team("Green", TeamColor::Green).unwrap();
        machine
    }

    fn started_machine() -> SessionMachine {
        let mut machine = three_team_machine();
        machine.start().unwrap();
        machine
    }

    fn score_of(machine: &SessionMachine, name: &str) -> i32 {
        machine.team(name).unwrap().score
    }

    #[test]
    fn start_requires_minimum_teams() {
        let mut machine = SessionMachine::new(
            Uuid::new_v4(),
            "Solo".to_string(),
            test_rules(),
            test_prompts(),
        );
        machine.add_team("Red", TeamColor::Red).unwrap();

        let err = machine.start().unwrap_err();
        assert_eq!(
            err,
            SetupError::NotEnoughTeams {
                required: 2,
                actual: 1
            }
        );
        // Rejected before any state mutation.
        assert_eq!(machine.status, SessionStatus::Setup);
        assert_eq!(machine.round, 1);
    }

    #[test]
    fn start_opens_first_prompt_and_clock() {
        let machine = started_machine();
        assert_eq!(machine.status, SessionStatus::Active);
        assert_eq!(machine.round, 1);
        assert!(!machine.current_prompt.is_empty());
        assert_eq!(machine.seconds_left(), 30);
        assert!(machine.clock_running());
    }

    #[test]
    fn duplicate_and_blank_team_names_rejected() {
        let mut machine = three_team_machine();
        assert_eq!(
            machine.add_team("Blue", TeamColor::Teal).unwrap_err(),
            SetupError::DuplicateTeamName("Blue".to_string())
        );
        assert_eq!(
            machine.add_team("   ", TeamColor::Teal).unwrap_err(),
            SetupError::BlankTeamName
        );
        assert_eq!(machine.teams.len(), 3);
    }

    #[test]
    fn teams_cannot_change_after_start() {
        let mut machine = started_machine();
        assert_eq!(
            machine.add_team("Latecomers", TeamColor::Pink).unwrap_err(),
            SetupError::NotInSetup
        );
        assert_eq!(machine.remove_team("Red").unwrap_err(), SetupError::NotInSetup);
    }

    #[test]
    fn first_buzz_wins_and_later_buzzes_are_too_late() {
        let mut machine = started_machine();

        assert_eq!(machine.buzz("Blue"), BuzzOutcome::Won);
        assert_eq!(machine.active_responder(), Some("Blue"));
        assert!(machine.current_buzz.is_some());

        // Everything after the first valid buzz loses the race.
        assert_eq!(machine.buzz("Red"), BuzzOutcome::TooLate);
        assert_eq!(machine.buzz("Green"), BuzzOutcome::TooLate);
        assert_eq!(machine.active_responder(), Some("Blue"));
    }

    #[test]
    fn buzz_rejections_do_not_mutate_state() {
        let mut machine = started_machine();
        machine.buzz("Blue");
        machine.apply_verdict("Blue", false).unwrap();

        let before_teams = machine.teams.clone();
        let before_status = machine.status.clone();

        assert_eq!(machine.buzz("Blue"), BuzzOutcome::LockedOut);
        assert!(!machine.buzz("Blue").accepted());
        assert_eq!(machine.buzz("Nobody"), BuzzOutcome::UnknownTeam);

        assert_eq!(machine.teams, before_teams);
        assert_eq!(machine.status, before_status);
    }

    #[test]
    fn buzzer_closed_outside_active_rounds() {
        let mut machine = three_team_machine();
        assert_eq!(machine.buzz("Red"), BuzzOutcome::Closed);
        machine.start().unwrap();
        assert!(machine.buzz("Red").accepted());
    }

    #[test]
    fn incorrect_verdict_penalizes_and_locks_out() {
        let mut machine = started_machine();
        machine.buzz("Blue");

        let outcome = machine.apply_verdict("Blue", false).unwrap();
        assert!(!outcome.is_correct);
        assert!(!outcome.prompt_abandoned);
        assert!(outcome.finished.is_none());

        assert_eq!(score_of(&machine, "Red"), 0);
        assert_eq!(score_of(&machine, "Blue"), -1);
        assert_eq!(score_of(&machine, "Green"), 0);
        assert!(machine.locked_out_teams.contains("Blue"));
        assert!(machine.team("Blue").unwrap().is_locked_out);
        // Buzzer reopened for the remaining teams, same prompt.
        assert_eq!(machine.status, SessionStatus::Active);
        assert_eq!(machine.round, 1);
    }

    #[test]
    fn correct_verdict_scores_clears_lockouts_and_advances() {
        let mut machine = started_machine();
        machine.buzz("Blue");
        machine.apply_verdict("Blue", false).unwrap();

        machine.buzz("Green");
        let outcome = machine.apply_verdict("Green", true).unwrap();
        assert!(outcome.is_correct);
        assert!(outcome.finished.is_none());

        assert_eq!(score_of(&machine, "Red"), 0);
        assert_eq!(score_of(&machine, "Blue"), -1);
        assert_eq!(score_of(&machine, "Green"), 1);
        assert!(machine.locked_out_teams.is_empty());
        assert!(!machine.team("Blue").unwrap().is_locked_out);
        assert_eq!(machine.round, 2);
        assert_eq!(machine.status, SessionStatus::Active);
        assert_eq!(machine.seconds_left(), 30);
    }

    #[test]
    fn out_of_turn_verdicts_rejected_without_state_change() {
        let mut machine = started_machine();

        // No verdict pending at all.
        assert_eq!(
            machine.apply_verdict("Red", true).unwrap_err(),
            VerdictError::OutOfTurn {
                active_responder: None
            }
        );

        machine.buzz("Blue");
        // Wrong team.
        assert_eq!(
            machine.apply_verdict("Red", true).unwrap_err(),
            VerdictError::OutOfTurn {
                active_responder: Some("Blue".to_string())
            }
        );
        assert_eq!(machine.active_responder(), Some("Blue"));
        assert_eq!(score_of(&machine, "Red"), 0);
    }

    #[test]
    fn all_teams_locked_out_abandons_prompt() {
        let mut machine = started_machine();

        for team in ["Red", "Blue"] {
            machine.buzz(team);
            machine.apply_verdict(team, false).unwrap();
        }
        machine.buzz("Green");
        let outcome = machine.apply_verdict("Green", false).unwrap();

        assert!(outcome.prompt_abandoned);
        assert!(outcome.finished.is_none());
        // Advanced with no further score change; lockouts reset.
        assert_eq!(machine.round, 2);
        assert_eq!(machine.status, SessionStatus::Active);
        assert!(machine.locked_out_teams.is_empty());
        assert_eq!(score_of(&machine, "Red"), -1);
        assert_eq!(score_of(&machine, "Blue"), -1);
        assert_eq!(score_of(&machine, "Green"), -1);
    }

    #[test]
    fn expiry_resolves_round_with_no_score_change() {
        let mut machine = started_machine();
        machine.buzz("Blue");
        machine.apply_verdict("Blue", false).unwrap();

        let mut last = TickOutcome::Idle;
        for _ in 0..30 {
            last = machine.tick();
        }
        assert_eq!(last, TickOutcome::Expired { finished: None });
        assert_eq!(machine.round, 2);
        assert_eq!(score_of(&machine, "Blue"), -1);
        assert!(machine.locked_out_teams.is_empty());
    }

    #[test]
    fn expiry_fires_exactly_once() {
        let mut machine = started_machine();
        let serial = machine.prompt_serial();
        for _ in 0..30 {
            machine.tick();
        }
        assert_eq!(machine.round, 2);

        // The old prompt's expiry is stale now; replaying it does nothing.
        assert_eq!(machine.handle_expiry(serial), None);
        assert_eq!(machine.round, 2);
        assert_eq!(machine.seconds_left(), 30);
    }

    #[test]
    fn ticking_a_stopped_clock_is_idle() {
        let mut machine = three_team_machine();
        assert_eq!(machine.tick(), TickOutcome::Idle);
        machine.start().unwrap();
        assert!(matches!(machine.tick(), TickOutcome::Ticked { .. }));
    }

    #[test]
    fn clock_keeps_running_through_verdict_window() {
        let mut machine = started_machine();
        machine.buzz("Blue");

        // Verdict windows are bounded by the round clock too.
        let mut last = TickOutcome::Idle;
        for _ in 0..30 {
            last = machine.tick();
        }
        assert_eq!(last, TickOutcome::Expired { finished: None });
        assert_eq!(machine.round, 2);
        assert_eq!(machine.active_responder(), None);
        assert_eq!(score_of(&machine, "Blue"), 0);
    }

    #[test]
    fn final_round_unique_leader_finishes() {
        let mut machine = started_machine();
        machine.set_total_rounds(1); // ignored: not in setup
        assert_eq!(machine.total_rounds, 10);

        let mut machine = three_team_machine();
        machine.set_total_rounds(1);
        machine.start().unwrap();

        machine.buzz("Green");
        let outcome = machine.apply_verdict("Green", true).unwrap();
        assert_eq!(
            outcome.finished,
            Some(GameOutcome::EmojiPictionary {
                winner: Some("Green".to_string()),
                is_tie: false,
            })
        );
        assert!(matches!(machine.status, SessionStatus::Finished { .. }));
        assert!(!machine.clock_running());
    }

    #[test]
    fn final_round_tie_goes_to_sudden_death() {
        let mut machine = three_team_machine();
        machine.set_total_rounds(2);
        machine.start().unwrap();

        machine.buzz("Red");
        machine.apply_verdict("Red", true).unwrap();
        machine.buzz("Blue");
        let outcome = machine.apply_verdict("Blue", true).unwrap();

        // red:1 blue:1 green:0 after the final round: tied at the top.
        assert!(outcome.finished.is_none());
        assert!(machine.sudden_death);
        assert_eq!(machine.status, SessionStatus::Active);
        assert_eq!(machine.round, 3); // totalRounds + 1
        assert!(machine.clock_running());
    }

    #[test]
    fn final_round_expiry_with_tied_top_goes_to_sudden_death() {
        let mut machine = three_team_machine();
        machine.set_total_rounds(1);
        machine.start().unwrap();
        // red:0 blue:0 green:0, everyone tied at the top.
        for _ in 0..30 {
            machine.tick();
        }
        assert!(machine.sudden_death);
        assert_eq!(machine.round, 2);
        assert_eq!(machine.status, SessionStatus::Active);
    }

    #[test]
    fn sudden_death_continues_until_sole_leader() {
        let mut machine = three_team_machine();
        machine.set_total_rounds(1);
        machine.start().unwrap();
        for _ in 0..30 {
            machine.tick();
        }
        assert!(machine.sudden_death);

        // Overtime round expires still tied: another overtime round.
        for _ in 0..30 {
            machine.tick();
        }
        assert!(machine.sudden_death);
        assert_eq!(machine.round, 3);
        assert_eq!(machine.status, SessionStatus::Active);

        // A correct answer in overtime produces a sole leader and ends it.
        machine.buzz("Red");
        let outcome = machine.apply_verdict("Red", true).unwrap();
        assert_eq!(
            outcome.finished,
            Some(GameOutcome::EmojiPictionary {
                winner: Some("Red".to_string()),
                is_tie: false,
            })
        );
    }

    #[test]
    fn rounds_are_monotonic() {
        let mut machine = three_team_machine();
        machine.set_total_rounds(3);
        machine.start().unwrap();

        let mut seen = vec![machine.round];
        for _ in 0..5 {
            for _ in 0..30 {
                machine.tick();
            }
            seen.push(machine.round);
            if matches!(machine.status, SessionStatus::Finished { .. }) {
                break;
            }
            machine.buzz("Green");
            machine.apply_verdict("Green", true).unwrap();
            seen.push(machine.round);
            if matches!(machine.status, SessionStatus::Finished { .. }) {
                break;
            }
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn finished_session_accepts_no_further_mutations() {
        let mut machine = three_team_machine();
        machine.set_total_rounds(1);
        machine.start().unwrap();
        machine.buzz("Green");
        machine.apply_verdict("Green", true).unwrap();
        assert!(matches!(machine.status, SessionStatus::Finished { .. }));

        assert_eq!(machine.buzz("Red"), BuzzOutcome::Closed);
        assert!(machine.apply_verdict("Green", true).is_err());
        assert_eq!(machine.tick(), TickOutcome::Idle);
        assert_eq!(score_of(&machine, "Green"), 1);
    }

    #[test]
    fn reset_returns_to_setup_keeping_teams() {
        let mut machine = started_machine();
        machine.buzz("Blue");
        machine.apply_verdict("Blue", false).unwrap();

        machine.reset();
        assert_eq!(machine.status, SessionStatus::Setup);
        assert_eq!(machine.round, 1);
        assert!(machine.locked_out_teams.is_empty());
        assert!(!machine.clock_running());
        assert_eq!(machine.teams.len(), 3);
        assert!(machine.teams.iter().all(|t| t.score == 0));
    }

    #[test]
    fn prompts_are_not_repeated_until_deck_recycles() {
        let mut machine = three_team_machine();
        machine.set_total_rounds(6);
        machine.start().unwrap();

        let mut seen = vec![machine.current_prompt.clone()];
        for _ in 0..2 {
            machine.buzz("Red");
            machine.apply_verdict("Red", true).unwrap();
            seen.push(machine.current_prompt.clone());
        }
        // Three prompts in the deck, three rounds: all distinct.
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn snapshot_serializes_round_state() {
        let mut machine = started_machine();
        machine.buzz("Blue");
        machine.apply_verdict("Blue", false).unwrap();

        let snapshot = serde_json::to_value(&machine).unwrap();
        assert_eq!(snapshot["name"], "Friday Social");
        assert_eq!(snapshot["round"], 1);
        assert_eq!(snapshot["total_rounds"], 10);
        assert_eq!(snapshot["seconds_left"], 30);
        assert_eq!(snapshot["locked_out_teams"][0], "Blue");
        assert_eq!(snapshot["status"]["type"], "Active");
        assert_eq!(snapshot["teams"][1]["score"], -1);
        assert_eq!(snapshot["teams"][1]["is_locked_out"], true);
        // Internals stay out of the snapshot.
        assert!(snapshot.get("prompts").is_none());
        assert!(snapshot.get("used_prompts").is_none());
    }
}
