use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use transport::{
    FrameHeader, FrameView, InitHeader, SubmitOutcome, TcpFrameListener, TcpFrameSender,
    TransportError,
};

fn test_init(width: u32, height: u32) -> InitHeader {
    InitHeader {
        num_images: 3,
        device_uuid: [0u8; 16],
        width,
        height,
        format_tag: 87,
        mem_index: 0,
        source_pid: std::process::id(),
    }
}

/// The gradient the original driver test tooling ships: shifts per frame
/// so every frame's bytes are distinguishable.
fn gradient(frame: u64, width: u32, height: u32) -> Vec<u8> {
    let mut pixels = vec![0u8; (width * height * 4) as usize];
    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = (y * width as usize + x) * 4;
            pixels[idx] = (x as u64 + frame * 10) as u8;
            pixels[idx + 1] = (y as u64 + frame * 5) as u8;
            pixels[idx + 2] = (frame * 20) as u8;
            pixels[idx + 3] = 255;
        }
    }
    pixels
}

fn frame_view<'a>(
    frame: u64,
    width: u32,
    height: u32,
    pixels: &'a [u8],
) -> FrameView<'a> {
    FrameView {
        frame_number: frame,
        image_index: (frame % 3) as u32,
        width,
        height,
        stride: width * 4,
        is_idr: frame == 0,
        target_timestamp_ns: frame * 1_000_000,
        semaphore_value: frame * 1_000_000,
        pose: transport::frame::IDENTITY_POSE,
        pixels,
    }
}

#[test]
fn test_happy_path_ten_frames() {
    const WIDTH: u32 = 1920;
    const HEIGHT: u32 = 1080;
    const FRAMES: u64 = 10;

    let listener = TcpFrameListener::bind(0).unwrap();
    let port = listener.local_port();
    let exiting = Arc::new(AtomicBool::new(false));

    let consumer_exiting = exiting.clone();
    let consumer = thread::spawn(move || {
        let mut stream = listener
            .accept(&consumer_exiting)
            .unwrap()
            .expect("producer should connect");

        let init = stream
            .read_init(&consumer_exiting)
            .unwrap()
            .expect("init header should arrive");
        assert_eq!(init.num_images, 3);
        assert_eq!(init.width, WIDTH);
        assert_eq!(init.height, HEIGHT);
        assert_eq!(init.format_tag, 87);

        let mut received = Vec::new();
        for _ in 0..FRAMES {
            let frame = stream
                .next_frame(&consumer_exiting)
                .unwrap()
                .expect("frame should arrive");
            assert_eq!(frame.header.width, WIDTH);
            assert_eq!(frame.header.stride, 7680);
            assert_eq!(frame.header.data_size, 8_294_400);
            assert_eq!(frame.pixels.len(), 8_294_400);

            let n = frame.header.frame_number as u64;
            assert_eq!(frame.header.is_idr, n == 0, "only frame 0 is flagged IDR");
            // Spot-check the gradient at a couple of pixels.
            assert_eq!(frame.pixels[2], (n * 20) as u8);
            assert_eq!(frame.pixels[3], 255);
            received.push(n);
        }
        received
    });

    let mut sender = TcpFrameSender::new(port, test_init(WIDTH, HEIGHT));
    let mut published = 0;
    for n in 0..FRAMES {
        let pixels = gradient(n, WIDTH, HEIGHT);
        // The first submit may race the accept loop; retry briefly.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match sender.submit(&frame_view(n, WIDTH, HEIGHT, &pixels)).unwrap() {
                SubmitOutcome::Published => {
                    published += 1;
                    break;
                }
                SubmitOutcome::Dropped => {
                    assert!(Instant::now() < deadline, "never reached the listener");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    let received = consumer.join().expect("consumer thread panicked");
    assert_eq!(published, FRAMES);
    assert_eq!(received, (0..FRAMES).collect::<Vec<_>>(), "frames are FIFO");
}

#[test]
fn test_peer_gone_returns_to_listening() {
    const WIDTH: u32 = 16;
    const HEIGHT: u32 = 8;

    let listener = TcpFrameListener::bind(0).unwrap();
    let port = listener.local_port();
    let exiting = Arc::new(AtomicBool::new(false));

    let consumer_exiting = exiting.clone();
    let consumer = thread::spawn(move || {
        // First connection: dies mid-stream.
        let mut stream = listener.accept(&consumer_exiting).unwrap().unwrap();
        stream.read_init(&consumer_exiting).unwrap().unwrap();
        stream.next_frame(&consumer_exiting).unwrap().unwrap();

        let death = Instant::now();
        let err = loop {
            match stream.next_frame(&consumer_exiting) {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("not cancelled"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, TransportError::PeerGone));
        let detected_in = death.elapsed();

        // Back to listening: a second producer is accepted without restart.
        let mut stream = listener.accept(&consumer_exiting).unwrap().unwrap();
        let init = stream.read_init(&consumer_exiting).unwrap().unwrap();
        assert_eq!(init.source_pid, std::process::id());
        detected_in
    });

    {
        let mut first = TcpFrameSender::new(port, test_init(WIDTH, HEIGHT));
        let pixels = gradient(0, WIDTH, HEIGHT);
        let deadline = Instant::now() + Duration::from_secs(5);
        while sender_submit(&mut first, 0, WIDTH, HEIGHT, &pixels) == SubmitOutcome::Dropped {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }
        // Dropping the sender closes the socket mid-stream.
    }

    // Give the consumer a beat to notice, then reconnect.
    thread::sleep(Duration::from_millis(50));
    let mut second = TcpFrameSender::new(port, test_init(WIDTH, HEIGHT));
    let pixels = gradient(1, WIDTH, HEIGHT);
    let deadline = Instant::now() + Duration::from_secs(5);
    while sender_submit(&mut second, 1, WIDTH, HEIGHT, &pixels) == SubmitOutcome::Dropped {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }

    let detected_in = consumer.join().expect("consumer thread panicked");
    // Detection itself is an immediate EOF; the bound here also absorbs
    // thread-scheduling noise between the two ends of the test.
    assert!(
        detected_in < Duration::from_millis(250),
        "peer loss took {detected_in:?} to surface"
    );
}

fn sender_submit(
    sender: &mut TcpFrameSender,
    n: u64,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> SubmitOutcome {
    sender.submit(&frame_view(n, width, height, pixels)).unwrap()
}

#[test]
fn test_impossible_frame_header_is_protocol_error() {
    let listener = TcpFrameListener::bind(0).unwrap();
    let port = listener.local_port();
    let exiting = AtomicBool::new(false);

    let writer = thread::spawn(move || {
        let mut raw = TcpStream::connect(("127.0.0.1", port)).unwrap();
        raw.write_all(&test_init(16, 8).encode()).unwrap();

        // data_size wildly inconsistent with the dimensions.
        let bogus = FrameHeader {
            image_index: 0,
            frame_number: 0,
            semaphore_value: 0,
            pose: [[0.0; 4]; 3],
            width: 16,
            height: 8,
            stride: 64,
            is_idr: false,
            data_size: u32::MAX,
        };
        raw.write_all(&bogus.encode()).unwrap();
        // Hold the socket open so EOF cannot mask the protocol error.
        thread::sleep(Duration::from_millis(500));
    });

    let mut stream = listener.accept(&exiting).unwrap().unwrap();
    stream.read_init(&exiting).unwrap().unwrap();
    assert!(matches!(
        stream.next_frame(&exiting),
        Err(TransportError::Protocol(_))
    ));
    writer.join().unwrap();
}

#[test]
fn test_sender_drops_silently_until_listener_appears() {
    const WIDTH: u32 = 16;
    const HEIGHT: u32 = 8;

    // Nobody is listening on this port yet.
    let probe = TcpFrameListener::bind(0).unwrap();
    let port = probe.local_port();
    drop(probe);

    let mut sender = TcpFrameSender::new(port, test_init(WIDTH, HEIGHT));
    let pixels = gradient(0, WIDTH, HEIGHT);

    for n in 0..3 {
        assert_eq!(
            sender_submit(&mut sender, n, WIDTH, HEIGHT, &pixels),
            SubmitOutcome::Dropped,
            "submit without a listener must drop, not error"
        );
    }
    assert_eq!(sender.frames_dropped(), 3);
    assert!(!sender.is_connected());

    // Listener appears; the next submit reconnects and goes through.
    let listener = TcpFrameListener::bind(port).unwrap();
    let exiting = Arc::new(AtomicBool::new(false));
    let consumer_exiting = exiting.clone();
    let consumer = thread::spawn(move || {
        let mut stream = listener.accept(&consumer_exiting).unwrap().unwrap();
        stream.read_init(&consumer_exiting).unwrap().unwrap();
        let frame = stream.next_frame(&consumer_exiting).unwrap().unwrap();
        frame.header.frame_number
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while sender_submit(&mut sender, 7, WIDTH, HEIGHT, &pixels) == SubmitOutcome::Dropped {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(consumer.join().unwrap(), 7);
}

#[test]
fn test_cancelled_accept_returns_none() {
    let listener = TcpFrameListener::bind(0).unwrap();
    let exiting = AtomicBool::new(true);
    let start = Instant::now();
    let accepted = listener.accept(&exiting).unwrap();
    assert!(accepted.is_none());
    assert!(
        start.elapsed() < Duration::from_millis(20),
        "cancelled accept must return within one poll tick"
    );
}
