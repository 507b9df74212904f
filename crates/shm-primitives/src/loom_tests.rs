#![cfg(all(test, feature = "loom"))]

use crate::handshake::{HandshakeHeader, HandshakeState, Role};
use crate::region::HeapRegion;
use crate::sync::thread;
use loom::cell::UnsafeCell;
use loom::sync::Arc;

/// Header lives in a region, the data area is a loom cell so that any access
/// outside a turn is reported as a data race.
struct Shared {
    _owner: HeapRegion,
    header: *const HandshakeHeader,
    data: UnsafeCell<u32>,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn new(initial: HandshakeState) -> Self {
        let owner = HeapRegion::new_zeroed(64);
        let region = owner.region();
        let header = unsafe { region.get_mut::<HandshakeHeader>(0) };
        header.init(initial);
        Self {
            header: header as *const HandshakeHeader,
            _owner: owner,
            data: UnsafeCell::new(0),
        }
    }

    fn header(&self) -> &HandshakeHeader {
        unsafe { &*self.header }
    }

    /// Spin until the header reads `wanted` or `also`; return what was seen.
    fn wait_for(&self, wanted: HandshakeState, also: Option<HandshakeState>) -> HandshakeState {
        loop {
            let state = self.header().load().unwrap();
            if state == wanted || Some(state) == also {
                return state;
            }
            thread::yield_now();
        }
    }
}

#[test]
fn exchange_hands_data_back_and_forth() {
    loom::model(|| {
        let shared = Arc::new(Shared::new(HandshakeState::OutputReady));

        let processor = thread::spawn({
            let shared = shared.clone();
            move || {
                let mut served = 0;
                loop {
                    let seen = shared.wait_for(
                        HandshakeState::InputReady,
                        Some(HandshakeState::NoMoreInput),
                    );
                    if seen == HandshakeState::NoMoreInput {
                        return served;
                    }
                    shared
                        .header()
                        .advance(Role::Processor, HandshakeState::InputReady, HandshakeState::Intermediate)
                        .unwrap();
                    shared.data.with_mut(|v| unsafe { *v *= 10 });
                    served += 1;
                    shared
                        .header()
                        .advance(Role::Processor, HandshakeState::Intermediate, HandshakeState::OutputReady)
                        .unwrap();
                }
            }
        });

        let header = shared.header();

        shared.wait_for(HandshakeState::OutputReady, None);
        header
            .advance(Role::Requestor, HandshakeState::OutputReady, HandshakeState::Intermediate)
            .unwrap();
        shared.data.with_mut(|v| unsafe { *v = 7 });
        header
            .advance(Role::Requestor, HandshakeState::Intermediate, HandshakeState::InputReady)
            .unwrap();

        shared.wait_for(HandshakeState::OutputReady, None);
        header
            .advance(Role::Requestor, HandshakeState::OutputReady, HandshakeState::Intermediate)
            .unwrap();
        let result = shared.data.with(|v| unsafe { *v });
        assert_eq!(result, 70);
        header
            .advance(Role::Requestor, HandshakeState::Intermediate, HandshakeState::NoMoreInput)
            .unwrap();

        assert_eq!(processor.join().unwrap(), 1);
        assert_eq!(header.load(), Ok(HandshakeState::NoMoreInput));
    });
}

#[test]
fn only_one_side_wins_a_contended_header() {
    loom::model(|| {
        let shared = Arc::new(Shared::new(HandshakeState::OutputReady));

        let a = thread::spawn({
            let shared = shared.clone();
            move || {
                shared
                    .header()
                    .advance(Role::Requestor, HandshakeState::OutputReady, HandshakeState::Intermediate)
                    .is_ok()
            }
        });
        let b = thread::spawn({
            let shared = shared.clone();
            move || {
                shared
                    .header()
                    .advance(Role::Requestor, HandshakeState::OutputReady, HandshakeState::NoMoreInput)
                    .is_ok()
            }
        });

        assert!(a.join().unwrap() != b.join().unwrap());
    });
}
