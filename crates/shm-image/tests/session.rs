//! End-to-end sessions with the processor running on another thread.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use shm_image::{
    CodecError, Echo, HandshakeError, HandshakeState, Image, OutputShape, PpmDirectory, Processor,
    Requestor, Rgb, Role, RowColours, Segment, SegmentLayout, Session, SessionError, SkipReason,
    WaitPolicy,
};
use shm_primitives::HeapRegion;

fn policy() -> WaitPolicy {
    WaitPolicy {
        spin: 16,
        poll_interval: Duration::from_micros(1),
        timeout: Some(Duration::from_secs(20)),
    }
}

/// A small image whose pixels depend on `seed`.
fn sample(seed: usize) -> Image {
    let rows = 1 + seed % 4;
    let columns = 1 + (seed * 7) % 5;
    let pixels = (0..rows * columns)
        .map(|i| {
            let v = (seed * 31 + i * 17) as u8;
            Rgb::new(v, v.wrapping_add(1), v.wrapping_mul(3))
        })
        .collect();
    Image::new(rows, columns, pixels).unwrap()
}

fn to_ppm(image: &Image) -> String {
    let mut out = format!("P3\n# sample\n{} {}\n255\n", image.columns(), image.rows());
    for row in image.row_slices() {
        let line: Vec<String> = row.iter().map(|p| format!("{} {} {}", p.r, p.g, p.b)).collect();
        out.push_str(&line.join("  "));
        out.push('\n');
    }
    out
}

/// A fresh directory with `img0.ppm` .. `img{count-1}.ppm`.
fn image_dir(tag: &str, count: usize) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("shm_image_{tag}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        fs::write(dir.join(format!("img{i}.ppm")), to_ppm(&sample(i))).unwrap();
    }
    dir
}

#[test]
fn echo_session_over_heap_region() {
    let layout = SegmentLayout::default();
    let mem = Arc::new(HeapRegion::new_zeroed(layout.size));
    let mut processor = Processor::create(mem.clone(), layout, policy()).unwrap();
    let requestor = Requestor::new(mem.clone(), layout, policy()).unwrap();

    let worker = thread::spawn(move || processor.serve(&mut Echo).unwrap());

    let source: Vec<Option<Image>> = (0..10).map(|i| Some(sample(i))).collect();
    let report = Session::new(requestor, source, 10)
        .with_output_shape(OutputShape::SameAsInput)
        .run()
        .unwrap();

    assert_eq!(worker.join().unwrap(), 10);
    assert!(report.skipped.is_empty());
    assert_eq!(report.exchanges.len(), 10);
    for (i, exchange) in report.exchanges.iter().enumerate() {
        assert_eq!(exchange.index, i);
        assert_eq!(exchange.input, sample(i));
        assert_eq!(exchange.output, exchange.input);
    }

    let region = mem.region();
    assert_eq!(unsafe { region.bytes(0, 1) }[0], HandshakeState::NoMoreInput.as_u8());
}

#[test]
fn echo_session_over_named_segment() {
    let count = 10;
    let dir = image_dir("named", count);
    let name = format!("/shm_image_it_{}", std::process::id());
    let layout = SegmentLayout::default();

    // Two independent mappings of the same object, as two processes would have.
    let created = Segment::create(&name, layout).unwrap();
    let mut processor = Processor::create(created, layout, policy()).unwrap();
    let attached = Segment::attach(&name, layout).unwrap();
    let requestor = Requestor::new(attached, layout, policy()).unwrap();

    let worker = thread::spawn(move || {
        let served = processor.serve(&mut Echo).unwrap();
        // No header writes after NO_MORE_INPUT.
        assert_eq!(processor.state().unwrap(), HandshakeState::NoMoreInput);
        served
    });

    let mut seen = Vec::new();
    let report = Session::new(requestor, PpmDirectory::new(&dir), count)
        .with_output_shape(OutputShape::SameAsInput)
        .run_with(|exchange| seen.push(exchange.index))
        .unwrap();

    assert_eq!(worker.join().unwrap(), count);
    assert_eq!(seen, (0..count).collect::<Vec<_>>());
    for exchange in &report.exchanges {
        assert_eq!(exchange.input, sample(exchange.index));
        assert_eq!(exchange.output, exchange.input);
    }

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn bad_files_are_skipped_and_the_rest_complete() {
    let count = 5;
    let dir = image_dir("skips", count);
    fs::remove_file(dir.join("img1.ppm")).unwrap();
    fs::write(dir.join("img3.ppm"), "P6\n1 1\n255\n0 0 0\n").unwrap();

    let layout = SegmentLayout::default();
    let mem = Arc::new(HeapRegion::new_zeroed(layout.size));
    let mut processor = Processor::create(mem.clone(), layout, policy()).unwrap();
    let requestor = Requestor::new(mem, layout, policy()).unwrap();
    let worker = thread::spawn(move || processor.serve(&mut RowColours).unwrap());

    let report = Session::new(requestor, PpmDirectory::new(&dir), count)
        .run()
        .unwrap();

    assert_eq!(worker.join().unwrap(), 3);
    let done: Vec<usize> = report.exchanges.iter().map(|e| e.index).collect();
    assert_eq!(done, [0, 2, 4]);
    let skipped: Vec<usize> = report.skipped.iter().map(|s| s.index).collect();
    assert_eq!(skipped, [1, 3]);
    assert!(
        report
            .skipped
            .iter()
            .all(|s| matches!(s.reason, SkipReason::Load(_)))
    );

    for exchange in &report.exchanges {
        assert_eq!(exchange.output.rows(), exchange.input.rows());
        assert_eq!(exchange.output.columns(), 1);
    }

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn inputs_without_room_for_the_answer_are_skipped() {
    // A 2x2 input fits, with room for one colour per row but not for an echo.
    let layout = SegmentLayout::new(1 + 14 + 6);
    let input = Image::new(2, 2, vec![Rgb::new(1, 2, 3); 4]).unwrap();

    for (shape, exchanged) in [(OutputShape::RowsByOne, 1), (OutputShape::SameAsInput, 0)] {
        let mem = Arc::new(HeapRegion::new_zeroed(layout.size));
        let mut processor = Processor::create(mem.clone(), layout, policy()).unwrap();
        let requestor = Requestor::new(mem, layout, policy()).unwrap();
        let worker = thread::spawn(move || processor.serve(&mut RowColours).unwrap());

        let report = Session::new(requestor, vec![Some(input.clone())], 1)
            .with_output_shape(shape)
            .run()
            .unwrap();

        assert_eq!(worker.join().unwrap(), exchanged);
        assert_eq!(report.exchanges.len(), exchanged);
        assert_eq!(report.skipped.len(), 1 - exchanged);
    }
}

#[test]
fn corrupt_answer_ends_the_session_and_releases_the_processor() {
    let count = 4;
    let dir = image_dir("corrupt", count);
    let layout = SegmentLayout::new(4096);
    let mem = Arc::new(HeapRegion::new_zeroed(layout.size));
    let mut processor = Processor::create(mem.clone(), layout, policy()).unwrap();
    let requestor = Requestor::new(mem.clone(), layout, policy()).unwrap();

    // Answers the first request properly, then scribbles over the input
    // dimensions so the answer can no longer be located.
    let worker = thread::spawn(move || {
        let mut served = 0;
        while let Some(mut turn) = processor.next_request().unwrap() {
            let input = turn.read_input().unwrap();
            if served == 0 {
                turn.write_output(&input).unwrap();
            } else {
                turn.data_mut()[..2].copy_from_slice(&[255, 255]);
            }
            turn.complete().unwrap();
            served += 1;
        }
        served
    });

    let mut seen = Vec::new();
    let err = Session::new(requestor, PpmDirectory::new(&dir), count)
        .with_output_shape(OutputShape::SameAsInput)
        .run_with(|exchange| seen.push(exchange.index))
        .unwrap_err();

    match err {
        SessionError::Output { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(source, CodecError::Truncated { .. }));
        }
        other => panic!("expected an output error, got {other}"),
    }
    assert_eq!(seen, [0]);
    // The processor saw NO_MORE_INPUT and returned instead of waiting forever.
    assert_eq!(worker.join().unwrap(), 2);
    let region = mem.region();
    assert_eq!(unsafe { region.bytes(0, 1) }[0], HandshakeState::NoMoreInput.as_u8());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn session_gives_up_on_a_silent_processor() {
    let layout = SegmentLayout::default();
    let mem = Arc::new(HeapRegion::new_zeroed(layout.size));
    let _processor = Processor::create(mem.clone(), layout, policy()).unwrap();
    let short = policy().with_timeout(Duration::from_millis(20));
    let requestor = Requestor::new(mem.clone(), layout, short).unwrap();

    // Nobody serves: the first input is submitted and never answered.
    let err = Session::new(requestor, vec![Some(sample(0))], 1)
        .run()
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Handshake(HandshakeError::TimedOut {
            role: Role::Requestor,
            awaiting: HandshakeState::OutputReady,
            ..
        })
    ));
    let region = mem.region();
    assert_eq!(unsafe { region.bytes(0, 1) }[0], HandshakeState::InputReady.as_u8());
}
