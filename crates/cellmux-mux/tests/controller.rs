use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cellmux_frame::{
    ChannelRole, Compat, ControlMessage, ControlType, Demuxer, Frame, FrameType, ModemStatus,
    V24Signals, CONTROL, FLAG,
};
use cellmux_mux::{
    urc_frame, ConfState, DlcState, EmulatorOptions, Mode, ModemEmulator, MuxConfig,
    MuxController, MuxError,
};
use cellmux_transport::{FakeModem, Transport, TransportError};

fn quick_config() -> MuxConfig {
    MuxConfig {
        command_timeout_ms: 300,
        cmux_close_delay_ms: 10,
        configure_retry_interval_ms: 20,
        configure_deadline_ms: 200,
        ..MuxConfig::default()
    }
}

fn emulated(options: EmulatorOptions) -> (Arc<FakeModem>, MuxController<FakeModem>) {
    let modem = Arc::new(ModemEmulator::new(options).into_fake());
    let mux = MuxController::new(Arc::clone(&modem), quick_config()).unwrap();
    (modem, mux)
}

fn started(options: EmulatorOptions) -> (Arc<FakeModem>, MuxController<FakeModem>) {
    let (modem, mux) = emulated(options);
    mux.start_multiplexer().unwrap();
    (modem, mux)
}

/// Frames the host wrote, in order.
fn host_frames(modem: &FakeModem) -> Vec<Frame> {
    let mut demux = Demuxer::new(Compat::strict());
    let mut frames = Vec::new();
    for write in modem.writes().iter().filter(|w| w.first() == Some(&FLAG)) {
        demux.push(write, |f| frames.push(f));
    }
    frames
}

/// Plain-mode text the host wrote, one entry per write.
fn host_text(modem: &FakeModem) -> Vec<String> {
    modem
        .writes()
        .iter()
        .filter(|w| w.first() != Some(&FLAG))
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .collect()
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn is_close_down(frame: &Frame) -> bool {
    frame.is(CONTROL, FrameType::Uih)
        && ControlMessage::decode(&frame.payload)
            .map(|(m, _)| m.kind == ControlType::Cld && m.command)
            .unwrap_or(false)
}

#[test]
fn full_bring_up_against_emulator() {
    let (modem, mux) = emulated(EmulatorOptions::default());

    assert_eq!(mux.baud_detect(Duration::from_secs(5)).unwrap(), 115_200);
    mux.configure().unwrap();
    mux.start_multiplexer().unwrap();

    assert_eq!(mux.mode(), Mode::Multiplexed);
    for role in ChannelRole::ALL {
        let channel = mux.get(role).expect("channel registered");
        assert_eq!(channel.state(), DlcState::Active, "{role}");
    }
    let signal = mux.signal_strength().expect("signal read after startup");
    assert_eq!(signal.rssi, 20);
    assert_eq!(signal.dbm, Some(-73));

    let sabms: Vec<Frame> = host_frames(&modem)
        .into_iter()
        .filter(|f| f.frame_type() == Some(FrameType::Sabm))
        .collect();
    assert_eq!(sabms.iter().map(Frame::dlci).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert!(sabms.iter().all(|f| f.is_command() && f.poll_final()));

    let text = host_text(&modem);
    let cmux = text.iter().find(|t| t.starts_with("AT+CMUX=")).unwrap();
    assert_eq!(cmux, "AT+CMUX=0,0,5,127,10,3,30,10,2\r");
}

#[test]
fn configure_runs_commands_in_order() {
    let (modem, mux) = emulated(EmulatorOptions::default());
    mux.configure().unwrap();

    let text = host_text(&modem);
    let config = quick_config();
    let mut expected = vec![
        config.commands.flow_control_on.clone(),
        config.commands.factory_reset.clone(),
        config.commands.echo_off.clone(),
        config.commands.sw_info.clone(),
    ];
    expected.extend(config.commands.modem_init.iter().cloned());
    expected.push(config.commands.sleep_clock_on.clone());
    assert_eq!(text, expected);
}

#[test]
fn configure_retries_final_command_until_deadline() {
    let (modem, mux) = emulated(EmulatorOptions {
        reject: vec!["AT+QSCLK=1".into()],
        ..EmulatorOptions::default()
    });
    let start = Instant::now();
    let result = mux.configure();
    assert!(matches!(result, Err(MuxError::NegotiationFailure { .. })));
    assert_eq!(ConfState::from(&result), ConfState::Failure);
    assert!(start.elapsed() < Duration::from_secs(2));

    let attempts = host_text(&modem)
        .iter()
        .filter(|t| t.as_str() == "AT+QSCLK=1\r")
        .count();
    assert!(attempts >= 2, "only {attempts} attempts");
}

#[test]
fn configure_stops_at_first_rejected_command() {
    let (modem, mux) = emulated(EmulatorOptions {
        reject: vec!["AT&F".into()],
        ..EmulatorOptions::default()
    });
    assert!(mux.configure().is_err());
    assert_eq!(host_text(&modem), vec!["AT+IFC=2,2\r", "AT&F\r"]);
}

#[test]
fn baud_detect_closes_stale_multiplexer() {
    let (modem, mux) = emulated(EmulatorOptions {
        baud: 460_800,
        start_multiplexed: true,
        ..EmulatorOptions::default()
    });
    assert_eq!(mux.baud_detect(Duration::from_secs(5)).unwrap(), 460_800);
    assert_eq!(modem.baud_history(), vec![460_800]);
    assert!(host_frames(&modem).iter().any(is_close_down));
    assert_eq!(mux.mode(), Mode::Plain);
}

#[test]
fn establish_retries_dropped_sabm() {
    let (modem, mux) = started(EmulatorOptions {
        ignore_sabm: BTreeMap::from([(1, 2)]),
        ..EmulatorOptions::default()
    });
    assert!(mux.get(ChannelRole::Commands).unwrap().is_active());
    let count = host_frames(&modem)
        .iter()
        .filter(|f| f.is(1, FrameType::Sabm))
        .count();
    assert_eq!(count, 3);
}

#[test]
fn failed_channel_rolls_back_startup() {
    let (modem, mux) = emulated(EmulatorOptions {
        refuse: vec![3],
        ..EmulatorOptions::default()
    });
    let result = mux.start_multiplexer();
    assert!(matches!(
        result,
        Err(MuxError::EstablishTimeout { dlci: 3, .. })
    ));
    assert_eq!(ConfState::from(&result), ConfState::Failure);
    assert_eq!(mux.mode(), Mode::Plain);
    assert!(mux.channel_info().is_empty());
    for role in ChannelRole::ALL {
        assert!(mux.get(role).is_none());
    }
    assert!(host_frames(&modem).iter().any(is_close_down));

    // The modem is back in plain mode and still answers.
    let reply = mux.at_command("AT\r", 0, Duration::from_secs(1)).unwrap();
    assert!(reply.is_ok());
}

#[test]
fn close_channels_leaves_no_active_handle() {
    let (modem, mux) = started(EmulatorOptions::default());
    let handles: Vec<_> = ChannelRole::ALL
        .iter()
        .map(|&role| mux.get(role).unwrap())
        .collect();

    mux.close_channels().unwrap();
    assert_eq!(mux.mode(), Mode::Plain);
    assert!(handles.iter().all(|h| h.state() == DlcState::Closed));
    assert!(is_close_down(host_frames(&modem).last().unwrap()));

    let err = handles[1]
        .send_command("AT\r", 0, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, MuxError::ChannelNotOpen(1)));
}

#[test]
fn commands_channel_round_trip() {
    let (_modem, mux) = started(EmulatorOptions::default());
    let commands = mux.get(ChannelRole::Commands).unwrap();
    let reply = commands
        .send_command("ATI\r", 0, Duration::from_secs(1))
        .unwrap();
    assert!(reply.is_ok());
    assert!(reply.search("Quectel", 0));

    let via_controller = mux.command("AT+CSQ\r").unwrap();
    assert_eq!(via_controller.find("+CSQ:"), Some("+CSQ: 20,99"));
}

#[test]
fn modem_status_gates_sending() {
    let (modem, mux) = started(EmulatorOptions::default());
    let commands = mux.get(ChannelRole::Commands).unwrap();
    assert!(commands.sending_allowed());

    let status = ModemStatus {
        dlci: 1,
        signals: V24Signals(V24Signals::RTR),
    };
    let msc = ControlMessage::command(ControlType::Msc, status.encode());
    let mut wire = bytes::BytesMut::new();
    Frame::new(CONTROL, true, FrameType::Uih, msc.encode())
        .encode(&mut wire)
        .unwrap();
    modem.inject(&wire);

    assert!(wait_until(|| !commands.sending_allowed()));
    let err = commands
        .send_command("AT\r", 0, Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, MuxError::SendingBlocked(1)));
    assert!(mux.get(ChannelRole::Data).unwrap().sending_allowed());
}

#[test]
fn interleaved_frames_reach_their_channels() {
    let (modem, mux) = started(EmulatorOptions::default());
    let received = Arc::new(Mutex::new(Vec::<(u8, Vec<u8>)>::new()));
    for role in [ChannelRole::Notifications, ChannelRole::Data] {
        let received = Arc::clone(&received);
        let dlci = role.dlci();
        mux.get(role)
            .unwrap()
            .set_async_callback(move |p| received.lock().unwrap().push((dlci, p.to_vec())));
    }

    let mut burst = urc_frame("RING");
    let mut data = bytes::BytesMut::new();
    Frame::new(3, true, FrameType::Uih, Bytes::from_static(b"\x7e\xff\x03"))
        .encode(&mut data)
        .unwrap();
    let test = ControlMessage::command(ControlType::Test, Bytes::from_static(b"t"));
    let mut control = bytes::BytesMut::new();
    Frame::new(CONTROL, true, FrameType::Uih, test.encode())
        .encode(&mut control)
        .unwrap();
    burst.extend_from_slice(&control);
    burst.extend_from_slice(&data);
    burst.extend(urc_frame("+CRING: VOICE"));
    modem.inject(&burst);

    assert!(wait_until(|| received.lock().unwrap().len() == 3));
    let got = received.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            (2, b"RING".to_vec()),
            (3, b"\x7e\xff\x03".to_vec()),
            (2, b"+CRING: VOICE".to_vec()),
        ]
    );
    assert_eq!(mux.demux_stats().checksum_errors, 0);
}

#[test]
fn audio_first_run_needs_reset() {
    let (modem, mux) = started(EmulatorOptions {
        audio_configured: false,
        ..EmulatorOptions::default()
    });
    let result = mux.audio_configure();
    assert!(matches!(result, Err(MuxError::ModemNeedsReset)));
    assert_eq!(ConfState::from(&result), ConfState::ModemNeedsReset);
    let sent_init = host_frames(&modem)
        .iter()
        .any(|f| f.payload.as_ref() == b"AT+QDAI=1,0,0,3,0,1,1,1\r");
    assert!(sent_init);
}

#[test]
fn audio_configured_applies_setup() {
    let (modem, mux) = started(EmulatorOptions::default());
    mux.audio_configure().unwrap();
    let payloads: Vec<Bytes> = host_frames(&modem).into_iter().map(|f| f.payload).collect();
    for command in &quick_config().commands.audio_setup {
        assert!(
            payloads.iter().any(|p| p.as_ref() == command.as_bytes()),
            "{command:?} not sent"
        );
    }
}

#[test]
fn modem_close_down_reverts_to_plain() {
    let (modem, mux) = started(EmulatorOptions::default());
    let data = mux.get(ChannelRole::Data).unwrap();
    let mut wire = bytes::BytesMut::new();
    Frame::new(CONTROL, true, FrameType::Uih, ControlMessage::close_down().encode())
        .encode(&mut wire)
        .unwrap();
    modem.inject(&wire);

    assert!(wait_until(|| mux.mode() == Mode::Plain));
    assert_eq!(data.state(), DlcState::Closed);
}

#[test]
fn read_failure_ends_session() {
    let (modem, mux) = started(EmulatorOptions::default());
    let commands = mux.get(ChannelRole::Commands).unwrap();
    modem.fail_reads(std::io::ErrorKind::BrokenPipe);

    assert!(wait_until(|| mux.last_error().is_some()));
    assert_eq!(mux.mode(), Mode::Plain);
    assert_eq!(commands.state(), DlcState::Closed);
    assert!(matches!(
        mux.open(ChannelRole::Commands),
        Err(MuxError::Transport(TransportError::Shutdown))
    ));
}

#[test]
fn read_failure_reaches_blocked_command() {
    let (modem, mux) = started(EmulatorOptions::default());
    let commands = mux.get(ChannelRole::Commands).unwrap();
    let waiter = {
        let commands = Arc::clone(&commands);
        // No CR, so the modem never answers.
        thread::spawn(move || commands.send_command("AT+CSQ", 0, Duration::from_secs(3)))
    };
    thread::sleep(Duration::from_millis(50));
    modem.fail_reads(std::io::ErrorKind::BrokenPipe);

    let result = waiter.join().unwrap();
    assert!(
        matches!(result, Err(MuxError::Transport(TransportError::Shutdown))),
        "{result:?}"
    );
    assert!(matches!(
        commands.send_data(b"AT\r"),
        Err(MuxError::Transport(TransportError::Shutdown))
    ));
}

#[test]
fn read_failure_during_establish_is_a_transport_error() {
    let (modem, mux) = emulated(EmulatorOptions {
        ignore_sabm: BTreeMap::from([(1, 100)]),
        ..EmulatorOptions::default()
    });
    let mux = Arc::new(mux);
    let starter = {
        let mux = Arc::clone(&mux);
        thread::spawn(move || mux.start_multiplexer())
    };
    assert!(wait_until(|| host_frames(&modem).iter().any(|f| f.is(1, FrameType::Sabm))));
    modem.fail_reads(std::io::ErrorKind::BrokenPipe);

    let result = starter.join().unwrap();
    assert!(
        matches!(result, Err(MuxError::Transport(TransportError::Shutdown))),
        "{result:?}"
    );
    assert_eq!(ConfState::from(&result), ConfState::Failure);
    assert_eq!(mux.mode(), Mode::Plain);
}

#[test]
fn write_failure_during_startup_is_fatal() {
    let (modem, mux) = emulated(EmulatorOptions::default());
    modem.fail_writes(std::io::ErrorKind::BrokenPipe);
    let result = mux.start_multiplexer();
    assert!(matches!(result, Err(MuxError::Transport(_))));
    assert!(mux.last_error().is_some());
}

#[test]
fn abort_collapses_establishment() {
    let (_modem, mux) = emulated(EmulatorOptions {
        ignore_sabm: BTreeMap::from([(0, 100)]),
        ..EmulatorOptions::default()
    });
    let mux = Arc::new(mux);
    let starter = {
        let mux = Arc::clone(&mux);
        thread::spawn(move || {
            let start = Instant::now();
            (mux.start_multiplexer(), start.elapsed())
        })
    };
    assert!(wait_until(|| mux.mode() == Mode::Negotiating));
    thread::sleep(Duration::from_millis(20));
    mux.abort();

    let (result, elapsed) = starter.join().unwrap();
    assert!(matches!(result, Err(MuxError::EstablishTimeout { dlci: 0, .. })));
    assert!(elapsed < Duration::from_millis(800), "took {elapsed:?}");
    assert_eq!(mux.mode(), Mode::Plain);
}

#[test]
fn drop_sends_close_down() {
    let (modem, mux) = started(EmulatorOptions::default());
    let writes_before = modem.write_count();
    drop(mux);
    assert!(modem.write_count() > writes_before);
    assert!(is_close_down(host_frames(&modem).last().unwrap()));
}

#[test]
fn unsolicited_payload_without_callback_is_counted() {
    let (modem, mux) = started(EmulatorOptions::default());
    modem.inject(&urc_frame("RING"));
    let notifications = mux.get(ChannelRole::Notifications).unwrap();
    assert!(wait_until(|| notifications.stats().dropped == 1));
    let info = mux.channel_info();
    assert_eq!(info.len(), 4);
    assert_eq!(info[2].stats.dropped, 1);
}

#[test]
fn plain_mode_calls_are_refused_while_multiplexed() {
    let (modem, mux) = started(EmulatorOptions::default());
    let err = mux.at_command("AT\r", 0, Duration::from_millis(50)).unwrap_err();
    assert!(matches!(
        err,
        MuxError::InvalidMode {
            expected: Mode::Plain,
            actual: Mode::Multiplexed
        }
    ));
    assert!(matches!(
        mux.baud_detect(Duration::from_secs(1)),
        Err(MuxError::InvalidMode { .. })
    ));
    assert_eq!(modem.baud_rate(), 115_200);
}
