//! Playback State Machine
//!
//! Position is always recomputed from absolute anchors:
//!
//! ```text
//! virtual_time(now) = T[anchor_row] + (now - anchor_wallclock_ms) * speed   // playing
//! virtual_time(now) = T[anchor_row]                                         // paused
//! ```
//!
//! Nothing is accumulated per call, so sampling the same instant twice yields
//! the same row no matter how often the clock is queried.
//!
//! Valid transitions:
//! - `Paused --Play--> Playing` (restarts from row 0 when parked on the terminal row)
//! - `Playing --Pause--> Paused`
//! - `Playing --terminal row reached--> Paused` (end-of-data, settled by `tick` and
//!   before every command)
//! - `SetSpeed` in either phase; re-anchors while playing
//! - `Seek` while paused
//!
//! Anything else is rejected and leaves the state unchanged.

use serde::{Deserialize, Serialize};

use super::error::{PlaybackError, PlaybackResult};
use super::timeline::CumulativeTimeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Paused,
    Playing,
}

/// Client-issued mutations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play,
    Pause,
    SetSpeed { speed: f64 },
    Seek { row: usize },
}

/// Per-session playback state. Invariant: `anchor_wallclock_ms.is_some() == is_playing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlaybackStateWire", into = "PlaybackStateWire")]
pub struct PlaybackState {
    is_playing: bool,
    anchor_wallclock_ms: Option<i64>,
    anchor_row: usize,
    speed: f64,
}

/// Shape shared with the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaybackStateWire {
    is_playing: bool,
    play_start_time: Option<i64>,
    #[serde(default)]
    play_start_row: usize,
    #[serde(default = "default_speed")]
    speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

impl TryFrom<PlaybackStateWire> for PlaybackState {
    type Error = String;

    fn try_from(wire: PlaybackStateWire) -> Result<Self, Self::Error> {
        if wire.is_playing != wire.play_start_time.is_some() {
            return Err("play_start_time must be set exactly when is_playing is true".to_string());
        }
        validate_speed(wire.speed).map_err(|e| e.to_string())?;
        Ok(Self {
            is_playing: wire.is_playing,
            anchor_wallclock_ms: wire.play_start_time,
            anchor_row: wire.play_start_row,
            speed: wire.speed,
        })
    }
}

impl From<PlaybackState> for PlaybackStateWire {
    fn from(state: PlaybackState) -> Self {
        Self {
            is_playing: state.is_playing,
            play_start_time: state.anchor_wallclock_ms,
            play_start_row: state.anchor_row,
            speed: state.speed,
        }
    }
}

fn validate_speed(speed: f64) -> PlaybackResult<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(PlaybackError::InvalidSpeed(speed))
    }
}

/// Result of sampling the clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tick {
    pub row: usize,
    pub virtual_time_ms: f64,
    /// True when this sample hit the terminal row and paused playback.
    pub ended: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            anchor_wallclock_ms: None,
            anchor_row: 0,
            speed: 1.0,
        }
    }
}

impl PlaybackState {
    pub fn paused_at(row: usize, speed: f64) -> PlaybackResult<Self> {
        validate_speed(speed)?;
        Ok(Self {
            anchor_row: row,
            speed,
            ..Self::default()
        })
    }

    pub fn phase(&self) -> PlaybackPhase {
        if self.is_playing {
            PlaybackPhase::Playing
        } else {
            PlaybackPhase::Paused
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn anchor_wallclock_ms(&self) -> Option<i64> {
        self.anchor_wallclock_ms
    }

    pub fn anchor_row(&self) -> usize {
        self.anchor_row
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Virtual elapsed time at `now_ms`. A wall clock behind the anchor counts as zero elapsed.
    pub fn virtual_time_ms(&self, timeline: &CumulativeTimeline, now_ms: i64) -> f64 {
        let base = timeline.offset_of(self.anchor_row);
        match self.anchor_wallclock_ms {
            Some(anchor) if self.is_playing => {
                let elapsed = now_ms.saturating_sub(anchor).max(0) as f64;
                base + elapsed * self.speed
            }
            _ => base,
        }
    }

    /// Row shown at `now_ms`. Read-only; end-of-data is applied by [`Self::tick`].
    pub fn current_row(&self, timeline: &CumulativeTimeline, now_ms: i64) -> usize {
        if self.is_playing {
            timeline.resolve(self.virtual_time_ms(timeline, now_ms))
        } else {
            self.anchor_row.min(timeline.terminal_row())
        }
    }

    /// Sample the clock, pausing automatically once the terminal row is reached.
    pub fn tick(&mut self, timeline: &CumulativeTimeline, now_ms: i64) -> Tick {
        let virtual_time_ms = self.virtual_time_ms(timeline, now_ms);
        let row = self.current_row(timeline, now_ms);
        let terminal = timeline.terminal_row();

        let ended = self.is_playing && row >= terminal;
        if ended {
            self.is_playing = false;
            self.anchor_wallclock_ms = None;
            self.anchor_row = terminal;
        }

        Tick {
            row,
            virtual_time_ms,
            ended,
        }
    }

    /// Apply a client command. On error the state is unchanged.
    ///
    /// End-of-data is settled at `now_ms` first, so a command that arrives after
    /// playback ran out sees the paused terminal state even if nobody sampled
    /// in between. Returns the row current after the transition.
    pub fn apply(
        &mut self,
        command: PlaybackCommand,
        timeline: &CumulativeTimeline,
        now_ms: i64,
    ) -> PlaybackResult<usize> {
        let mut next = self.clone();
        next.tick(timeline, now_ms);
        let row = next.transition(command, timeline, now_ms)?;
        *self = next;
        Ok(row)
    }

    fn transition(
        &mut self,
        command: PlaybackCommand,
        timeline: &CumulativeTimeline,
        now_ms: i64,
    ) -> PlaybackResult<usize> {
        let terminal = timeline.terminal_row();
        let phase = self.phase();

        match (phase, command) {
            (PlaybackPhase::Paused, PlaybackCommand::Play) => {
                let current = self.anchor_row.min(terminal);
                self.anchor_row = if current >= terminal { 0 } else { current };
                self.anchor_wallclock_ms = Some(now_ms);
                self.is_playing = true;
                Ok(self.anchor_row)
            }
            (PlaybackPhase::Playing, PlaybackCommand::Pause) => {
                let row = self.current_row(timeline, now_ms).min(terminal);
                self.anchor_row = row;
                self.anchor_wallclock_ms = None;
                self.is_playing = false;
                Ok(row)
            }
            (_, PlaybackCommand::SetSpeed { speed }) => {
                validate_speed(speed)?;
                if phase == PlaybackPhase::Playing {
                    // Re-anchor so the new multiplier only applies from now on.
                    self.anchor_row = self.current_row(timeline, now_ms);
                    self.anchor_wallclock_ms = Some(now_ms);
                }
                self.speed = speed;
                Ok(self.current_row(timeline, now_ms))
            }
            (PlaybackPhase::Paused, PlaybackCommand::Seek { row }) => {
                self.anchor_row = row.min(terminal);
                Ok(self.anchor_row)
            }
            _ => Err(PlaybackError::InvalidTransition { phase, command }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20 rows, 100ms apart: T[i] = 100 * i.
    fn timeline() -> CumulativeTimeline {
        CumulativeTimeline::from_offsets((0..20).map(|i| i as f64 * 100.0).collect())
    }

    fn playing(anchor_row: usize, anchor_ms: i64, speed: f64) -> PlaybackState {
        PlaybackState {
            is_playing: true,
            anchor_wallclock_ms: Some(anchor_ms),
            anchor_row,
            speed,
        }
    }

    #[test]
    fn test_anti_drift_pure_function_of_wallclock() {
        let tl = timeline();
        let state = playing(10, 5_000, 2.0);
        assert_eq!(state.virtual_time_ms(&tl, 5_500), 1_000.0 + 1_000.0);
        let first = state.current_row(&tl, 5_500);
        let second = state.current_row(&tl, 5_500);
        assert_eq!(first, 19);
        assert_eq!(first, second);
    }

    #[test]
    fn test_paused_is_frozen() {
        let tl = timeline();
        let state = PlaybackState::paused_at(7, 4.0).unwrap();
        assert_eq!(state.virtual_time_ms(&tl, 0), 700.0);
        assert_eq!(state.virtual_time_ms(&tl, 1_000_000), 700.0);
        assert_eq!(state.current_row(&tl, 1_000_000), 7);
    }

    #[test]
    fn test_play_from_current_row() {
        let tl = timeline();
        let mut state = PlaybackState::paused_at(5, 1.0).unwrap();
        assert_eq!(state.apply(PlaybackCommand::Play, &tl, 1_000).unwrap(), 5);
        assert_eq!(state.anchor_wallclock_ms(), Some(1_000));
        assert_eq!(state.current_row(&tl, 1_250), 7);
    }

    #[test]
    fn test_pause_freezes_resolved_row() {
        let tl = timeline();
        let mut state = PlaybackState::default();
        state.apply(PlaybackCommand::Play, &tl, 0).unwrap();
        assert_eq!(state.apply(PlaybackCommand::Pause, &tl, 420).unwrap(), 4);
        assert!(!state.is_playing());
        assert_eq!(state.anchor_wallclock_ms(), None);
        assert_eq!(state.current_row(&tl, 99_999), 4);
    }

    #[test]
    fn test_speed_change_reanchors_not_retroactive() {
        let tl = timeline();
        let mut state = PlaybackState::default();
        state.apply(PlaybackCommand::Play, &tl, 0).unwrap();
        // 500ms at 1x -> row 5
        state
            .apply(PlaybackCommand::SetSpeed { speed: 2.0 }, &tl, 500)
            .unwrap();
        assert_eq!(state.anchor_row(), 5);
        assert_eq!(state.anchor_wallclock_ms(), Some(500));
        // 200ms more at 2x -> +400ms of virtual time
        assert_eq!(state.current_row(&tl, 700), 9);
    }

    #[test]
    fn test_speed_change_while_paused_keeps_position() {
        let tl = timeline();
        let mut state = PlaybackState::paused_at(3, 1.0).unwrap();
        state
            .apply(PlaybackCommand::SetSpeed { speed: 4.0 }, &tl, 100)
            .unwrap();
        assert_eq!(state.speed(), 4.0);
        assert_eq!(state.anchor_row(), 3);
        assert!(!state.is_playing());
    }

    #[test]
    fn test_end_of_data_pauses_and_replay_restarts() {
        let tl = timeline();
        let mut state = PlaybackState::paused_at(15, 1.0).unwrap();
        state.apply(PlaybackCommand::Play, &tl, 0).unwrap();

        let mid = state.tick(&tl, 200);
        assert_eq!(mid.row, 17);
        assert!(!mid.ended);

        let end = state.tick(&tl, 10_000);
        assert_eq!(end.row, 19);
        assert!(end.ended);
        assert_eq!(state.phase(), PlaybackPhase::Paused);
        assert_eq!(state.anchor_row(), 19);

        assert_eq!(state.apply(PlaybackCommand::Play, &tl, 20_000).unwrap(), 0);
        assert_eq!(state.current_row(&tl, 20_000), 0);
    }

    #[test]
    fn test_play_after_end_without_sampling_restarts() {
        let tl = timeline();
        let mut state = PlaybackState::default();
        state.apply(PlaybackCommand::Play, &tl, 0).unwrap();
        assert_eq!(state.current_row(&tl, 60_000), 19);

        assert_eq!(state.apply(PlaybackCommand::Play, &tl, 60_000).unwrap(), 0);
        assert!(state.is_playing());
        assert_eq!(state.anchor_wallclock_ms(), Some(60_000));
        assert_eq!(state.current_row(&tl, 60_300), 3);
    }

    #[test]
    fn test_seek_after_end_without_sampling() {
        let tl = timeline();
        let mut state = PlaybackState::default();
        state.apply(PlaybackCommand::Play, &tl, 0).unwrap();

        assert_eq!(state.apply(PlaybackCommand::Seek { row: 4 }, &tl, 60_000).unwrap(), 4);
        assert_eq!(state.phase(), PlaybackPhase::Paused);

        // Pause after the data ran out finds playback already stopped.
        let mut ended = PlaybackState::default();
        ended.apply(PlaybackCommand::Play, &tl, 0).unwrap();
        let before = ended.clone();
        assert!(matches!(
            ended.apply(PlaybackCommand::Pause, &tl, 60_000),
            Err(PlaybackError::InvalidTransition {
                phase: PlaybackPhase::Paused,
                ..
            })
        ));
        assert_eq!(ended, before);
    }

    #[test]
    fn test_invalid_transitions_fail_closed() {
        let tl = timeline();
        let mut paused = PlaybackState::paused_at(2, 1.0).unwrap();
        let before = paused.clone();
        assert!(matches!(
            paused.apply(PlaybackCommand::Pause, &tl, 0),
            Err(PlaybackError::InvalidTransition { .. })
        ));
        assert_eq!(paused, before);

        let mut running = playing(2, 0, 1.0);
        let before = running.clone();
        assert!(running.apply(PlaybackCommand::Play, &tl, 10).is_err());
        assert!(running.apply(PlaybackCommand::Seek { row: 9 }, &tl, 10).is_err());
        assert_eq!(
            running.apply(PlaybackCommand::SetSpeed { speed: 0.0 }, &tl, 10),
            Err(PlaybackError::InvalidSpeed(0.0))
        );
        assert!(running
            .apply(PlaybackCommand::SetSpeed { speed: f64::NAN }, &tl, 10)
            .is_err());
        assert_eq!(running, before);
    }

    #[test]
    fn test_seek_clamps_to_terminal() {
        let tl = timeline();
        let mut state = PlaybackState::default();
        assert_eq!(state.apply(PlaybackCommand::Seek { row: 500 }, &tl, 0).unwrap(), 19);
    }

    #[test]
    fn test_wire_format() {
        let state = playing(3, 1_700_000_000_000, 2.0);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "is_playing": true,
                "play_start_time": 1_700_000_000_000_i64,
                "play_start_row": 3,
                "speed": 2.0
            })
        );
        let back: PlaybackState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_wire_rejects_broken_invariant() {
        let bad = serde_json::json!({
            "is_playing": true,
            "play_start_time": null,
            "play_start_row": 0,
            "speed": 1
        });
        assert!(serde_json::from_value::<PlaybackState>(bad).is_err());

        let bad_speed = serde_json::json!({
            "is_playing": false,
            "play_start_time": null,
            "play_start_row": 0,
            "speed": -1
        });
        assert!(serde_json::from_value::<PlaybackState>(bad_speed).is_err());
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: PlaybackCommand =
            serde_json::from_str(r#"{"command":"set_speed","speed":4}"#).unwrap();
        assert_eq!(cmd, PlaybackCommand::SetSpeed { speed: 4.0 });
        let cmd: PlaybackCommand = serde_json::from_str(r#"{"command":"play"}"#).unwrap();
        assert_eq!(cmd, PlaybackCommand::Play);
    }
}
