//! Two parties stepping through the handshake on a shared header.
//!
//! Each side is a small state machine that only touches the data bytes while
//! it believes it owns them. Ownership claims are tracked outside the region,
//! so any schedule that lets both sides in at once is reported.

use shm_primitives::{HEADER_LEN, HandshakeHeader, HandshakeState, HeapRegion, Region, Role};

const INPUT: usize = HEADER_LEN;
const OUTPUT: usize = HEADER_LEN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestorPhase {
    AwaitIdle,
    Writing,
    AwaitResult,
    Reading,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorPhase {
    Polling,
    Writing,
    Exited,
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub exchanges: u8,
    pub final_state: HandshakeState,
}

pub struct HandshakeModel {
    _owner: HeapRegion,
    region: Region,
    requestor: RequestorPhase,
    processor: ProcessorPhase,
    /// Images still to send.
    remaining: u8,
    /// Values sent so far, used to check each reply.
    sent: u8,
    exchanges: u8,
    data_owner: Option<Role>,
}

impl HandshakeModel {
    pub fn new(images: u8) -> Self {
        let owner = HeapRegion::new_zeroed(16);
        let region = owner.region();
        // SAFETY: nobody else holds the region yet.
        unsafe { region.get_mut::<HandshakeHeader>(0) }.init(HandshakeState::OutputReady);
        Self {
            _owner: owner,
            region,
            requestor: RequestorPhase::AwaitIdle,
            processor: ProcessorPhase::Polling,
            remaining: images,
            sent: 0,
            exchanges: 0,
            data_owner: None,
        }
    }

    fn header(&self) -> &HandshakeHeader {
        // SAFETY: offset 0 holds the header, initialized in `new`.
        unsafe { self.region.get::<HandshakeHeader>(0) }
    }

    fn state(&self) -> Result<HandshakeState, String> {
        self.header()
            .load()
            .map_err(|raw| format!("corrupt header byte {raw}"))
    }

    fn advance(&self, role: Role, from: HandshakeState, to: HandshakeState) -> Result<(), String> {
        self.header()
            .advance(role, from, to)
            .map_err(|e| format!("{role}: {e}"))
    }

    fn claim(&mut self, role: Role) -> Result<(), String> {
        if let Some(other) = self.data_owner {
            return Err(format!("{role} entered the data area while {other} owns it"));
        }
        if self.state()? != HandshakeState::Intermediate {
            return Err(format!("{role} owns the data area but header is not INTERMEDIATE"));
        }
        self.data_owner = Some(role);
        Ok(())
    }

    fn release(&mut self, role: Role) -> Result<(), String> {
        if self.data_owner != Some(role) {
            return Err(format!("{role} released a data area it does not own"));
        }
        self.data_owner = None;
        Ok(())
    }

    fn byte(&self, offset: usize) -> u8 {
        // SAFETY: only called by the current data owner.
        unsafe { self.region.bytes(offset, 1) }[0]
    }

    fn set_byte(&self, offset: usize, value: u8) {
        // SAFETY: as above.
        unsafe { self.region.bytes_mut(offset, 1) }[0] = value;
    }

    fn end_session(&mut self) -> Result<(), String> {
        self.release(Role::Requestor)?;
        self.advance(
            Role::Requestor,
            HandshakeState::Intermediate,
            HandshakeState::NoMoreInput,
        )?;
        self.requestor = RequestorPhase::Done;
        Ok(())
    }

    /// Let the requestor make one move, if it can.
    pub fn step_requestor(&mut self) -> Result<(), String> {
        let state = self.state()?;
        match self.requestor {
            RequestorPhase::AwaitIdle if state == HandshakeState::OutputReady => {
                self.advance(
                    Role::Requestor,
                    HandshakeState::OutputReady,
                    HandshakeState::Intermediate,
                )?;
                self.claim(Role::Requestor)?;
                if self.remaining == 0 {
                    self.end_session()?;
                } else {
                    self.requestor = RequestorPhase::Writing;
                }
            }
            RequestorPhase::Writing => {
                self.sent = self.sent.wrapping_add(1);
                self.set_byte(INPUT, self.sent);
                self.remaining -= 1;
                self.release(Role::Requestor)?;
                self.advance(
                    Role::Requestor,
                    HandshakeState::Intermediate,
                    HandshakeState::InputReady,
                )?;
                self.requestor = RequestorPhase::AwaitResult;
            }
            RequestorPhase::AwaitResult if state == HandshakeState::OutputReady => {
                self.advance(
                    Role::Requestor,
                    HandshakeState::OutputReady,
                    HandshakeState::Intermediate,
                )?;
                self.claim(Role::Requestor)?;
                self.requestor = RequestorPhase::Reading;
            }
            RequestorPhase::Reading => {
                let expected = self.sent.wrapping_mul(3);
                let got = self.byte(OUTPUT);
                if got != expected {
                    return Err(format!("reply {got} for input {}, expected {expected}", self.sent));
                }
                self.exchanges += 1;
                if self.remaining == 0 {
                    self.end_session()?;
                } else {
                    self.requestor = RequestorPhase::Writing;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Let the processor make one move, if it can.
    pub fn step_processor(&mut self) -> Result<(), String> {
        let state = self.state()?;
        match self.processor {
            ProcessorPhase::Polling if state == HandshakeState::InputReady => {
                self.advance(
                    Role::Processor,
                    HandshakeState::InputReady,
                    HandshakeState::Intermediate,
                )?;
                self.claim(Role::Processor)?;
                self.processor = ProcessorPhase::Writing;
            }
            ProcessorPhase::Polling if state == HandshakeState::NoMoreInput => {
                self.processor = ProcessorPhase::Exited;
            }
            ProcessorPhase::Writing => {
                let input = self.byte(INPUT);
                self.set_byte(OUTPUT, input.wrapping_mul(3));
                self.release(Role::Processor)?;
                self.advance(
                    Role::Processor,
                    HandshakeState::Intermediate,
                    HandshakeState::OutputReady,
                )?;
                self.processor = ProcessorPhase::Polling;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.requestor == RequestorPhase::Done && self.processor == ProcessorPhase::Exited
    }

    /// Alternate both sides until the session ends.
    pub fn drain(&mut self) -> Result<Outcome, String> {
        // Each exchange needs at most four moves per side.
        let budget = 8 * (self.remaining as usize + 2);
        for _ in 0..budget {
            if self.is_finished() {
                break;
            }
            self.step_requestor()?;
            self.step_processor()?;
        }
        if !self.is_finished() {
            return Err(format!(
                "stuck: requestor {:?}, processor {:?}, header {:?}",
                self.requestor,
                self.processor,
                self.state()
            ));
        }
        Ok(Outcome {
            exchanges: self.exchanges,
            final_state: self.state()?,
        })
    }
}

/// Run `schedule` (true = requestor moves) then drain to completion.
pub fn execute_and_verify(images: u8, schedule: &[bool]) -> Result<Outcome, String> {
    let mut model = HandshakeModel::new(images);
    for &requestor_moves in schedule {
        if requestor_moves {
            model.step_requestor()?;
        } else {
            model.step_processor()?;
        }
    }
    let outcome = model.drain()?;
    if outcome.exchanges != images {
        return Err(format!("{} of {images} exchanges completed", outcome.exchanges));
    }
    if outcome.final_state != HandshakeState::NoMoreInput {
        return Err(format!("session ended in {}", outcome.final_state));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternating_schedule_completes() {
        let outcome = execute_and_verify(3, &[true, false].repeat(10)).unwrap();
        assert_eq!(outcome.exchanges, 3);
    }

    #[test]
    fn lopsided_schedules_complete() {
        execute_and_verify(2, &[true; 50]).unwrap();
        execute_and_verify(2, &[false; 50]).unwrap();
    }

    #[test]
    fn empty_session_still_ends() {
        let outcome = execute_and_verify(0, &[]).unwrap();
        assert_eq!(outcome.final_state, HandshakeState::NoMoreInput);
    }
}
