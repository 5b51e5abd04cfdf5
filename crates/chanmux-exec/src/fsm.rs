use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of one transition.
///
/// A failed transition is an explicit outcome, not a panic: [`Step::Abort`]
/// terminates the machine with a reason the caller can act on.
pub enum Step<S> {
    Next(S),
    Abort(String),
}

/// The generic finite-state-machine shape driven by an [`FsmExecutor`].
///
/// Inputs arrive one at a time; `is_final` is evaluated synchronously after
/// `init` and after every `step`, by the same thread.
pub trait Automaton: Send {
    type State: Send;
    type Input;

    /// Produce the initial state. Runs exactly once, before any input.
    fn init(&mut self) -> Self::State;

    /// Consume one input, producing the next state or aborting.
    fn step(&mut self, state: Self::State, input: Self::Input) -> Step<Self::State>;

    fn is_final(&self, state: &Self::State) -> bool;

    /// The machine was stopped before reaching a final state.
    fn stopped(&mut self);
}

/// Per-input feedback from the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// The machine accepted the input and is still running.
    Active,
    /// The machine reached a final state.
    Finished,
    /// The machine aborted; the reason comes from [`Step::Abort`].
    Aborted(String),
}

static NEXT_FSM_ID: AtomicU64 = AtomicU64::new(1);

/// Synchronous driver for an [`Automaton`].
///
/// The executor holds the current state between inputs and latches inactive
/// once the machine finishes, aborts, or is deactivated externally. It is not
/// itself thread-safe; callers serialize access (one thread at a time).
pub struct FsmExecutor<A: Automaton> {
    id: String,
    automaton: A,
    state: Option<A::State>,
    active: bool,
}

impl<A: Automaton> FsmExecutor<A> {
    pub fn new(name: &str, automaton: A) -> Self {
        let n = NEXT_FSM_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{name}-{n}"),
            automaton,
            state: None,
            active: false,
        }
    }

    /// Unique executor id, stable for its lifetime.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `init` and evaluate the final-state predicate once.
    pub fn start(&mut self) -> Feed {
        let state = self.automaton.init();
        self.active = !self.automaton.is_final(&state);
        self.state = Some(state);
        if self.active {
            Feed::Active
        } else {
            Feed::Finished
        }
    }

    /// Feed one input through the machine.
    pub fn feed(&mut self, input: A::Input) -> Feed {
        if !self.active {
            return Feed::Finished;
        }
        let state = match self.state.take() {
            Some(state) => state,
            None => {
                self.active = false;
                return Feed::Finished;
            }
        };
        match self.automaton.step(state, input) {
            Step::Next(next) => {
                self.active = !self.automaton.is_final(&next);
                self.state = Some(next);
                if self.active {
                    Feed::Active
                } else {
                    Feed::Finished
                }
            }
            Step::Abort(reason) => {
                self.active = false;
                Feed::Aborted(reason)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Latch the executor inactive. Returns true if it was active, so callers
    /// can decide exactly one winner between competing termination paths.
    pub fn deactivate(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// Take the current state out of the executor (for timeout callbacks).
    pub fn take_state(&mut self) -> Option<A::State> {
        self.state.take()
    }

    pub fn automaton_mut(&mut self) -> &mut A {
        &mut self.automaton
    }

    /// Notify the automaton it was stopped mid-run.
    pub fn fire_stopped(&mut self) {
        self.automaton.stopped();
    }
}
