// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer circulation and flushing on a running component.
//!
//! Unless a test says otherwise, the fake empties input buffers as soon as it
//! gets them and keeps output buffers until told to produce.

mod common;

use std::{
    sync::{atomic::Ordering, mpsc},
    time::Duration,
};

use common::{
    INPUT, OUTPUT, PRODUCED_LEN, PortSetup, running_component, setup_test, start, test_config,
};
use omx::{Acquired, Buffer, Error, ErrorCode, Port, PortStats, State, Timeouts};

const BLOCKED: Duration = Duration::from_millis(100);
const DONE: Duration = Duration::from_secs(2);

fn acquire(port: &Port) -> Buffer {
    match port.acquire_buffer().unwrap() {
        Acquired::Buffer(buffer) => buffer,
        other => panic!("expected a buffer on port {}, got {:?}", port.index(), other),
    }
}

/// The fourth acquisition on a three-buffer input port waits for a release.
#[test]
fn acquire_blocks_until_a_buffer_returns() {
    let test = running_component("acquire-blocks");

    let mut buffers: Vec<_> = (0..3).map(|_| acquire(&test.input)).collect();
    assert_eq!(test.input.stats().leased, 3);

    let (tx, rx) = mpsc::channel();
    let input = test.input.clone();
    let waiter = std::thread::spawn(move || tx.send(input.acquire_buffer()).unwrap());
    assert!(rx.recv_timeout(BLOCKED).is_err());

    let mut buffer = buffers.pop().unwrap();
    buffer.data_mut()[..4].copy_from_slice(b"omx!");
    buffer.set_filled_len(4);
    buffer.set_flags(omx_sys::OMX_BUFFERFLAG_ENDOFFRAME);
    assert_eq!(buffer.data(), b"omx!");
    test.input.release_buffer(buffer).unwrap();

    match rx.recv_timeout(DONE).unwrap().unwrap() {
        Acquired::Buffer(buffer) => {
            // Emptied buffers come back without stale offset or flags.
            assert_eq!(buffer.filled_len(), 0);
            assert_eq!(buffer.offset(), 0);
            assert_eq!(buffer.flags(), 0);
        }
        other => panic!("expected a buffer, got {:?}", other),
    }
    waiter.join().unwrap();
    assert_eq!(test.hardware.empties.load(Ordering::SeqCst), 1);
}

#[test]
fn output_buffers_circulate() {
    let test = running_component("output");
    assert_eq!(test.hardware.fills.load(Ordering::SeqCst), 3);
    assert_eq!(test.output.stats().at_hardware, 3);

    assert_eq!(test.hardware.produce(OUTPUT, 1), 1);
    let buffer = acquire(&test.output);
    assert_eq!(buffer.filled_len(), PRODUCED_LEN);
    assert_eq!(buffer.data().len(), PRODUCED_LEN as usize);
    assert_eq!(buffer.capacity(), 8192);
    assert_eq!(buffer.port(), OUTPUT);
    assert_eq!(buffer.settings_version(), 0);
    assert!(!buffer.has_external_memory());

    test.output.release_buffer(buffer).unwrap();
    assert_eq!(test.hardware.fills.load(Ordering::SeqCst), 4);
    assert_eq!(
        test.output.stats(),
        PortStats {
            total: 3,
            at_hardware: 3,
            ..Default::default()
        }
    );
}

#[test]
fn dropped_lease_returns_to_the_port() {
    let test = running_component("drop-lease");

    let buffer = acquire(&test.input);
    assert_eq!(test.input.stats().pending, 2);
    drop(buffer);
    assert_eq!(
        test.input.stats(),
        PortStats {
            total: 3,
            pending: 3,
            ..Default::default()
        }
    );
    assert_eq!(test.hardware.empties.load(Ordering::SeqCst), 0);
}

#[test]
fn flushing_port_hands_out_nothing() {
    let test = running_component("flushing");
    test.input.set_flushing(true).unwrap();
    assert!(test.input.is_flushing());
    assert_eq!(test.input.stats().pending, 3);

    let threads: Vec<_> = (0..2)
        .map(|_| {
            let input = test.input.clone();
            std::thread::spawn(move || input.acquire_buffer())
        })
        .collect();
    for thread in threads {
        assert!(matches!(thread.join().unwrap(), Ok(Acquired::Flushing)));
    }

    test.input.set_flushing(false).unwrap();
    drop(acquire(&test.input));
}

/// A flush completes only once every buffer held by the hardware came back.
#[test]
fn flush_waits_for_outstanding_buffers() {
    let test = running_component("flush-wait");
    test.hardware.set_hold_input(true);
    test.hardware.set_manual_flush(true);

    let mut buffers: Vec<_> = (0..3).map(|_| acquire(&test.input)).collect();
    drop(buffers.pop());
    for buffer in buffers {
        test.input.release_buffer(buffer).unwrap();
    }
    assert_eq!(test.hardware.held(INPUT), 2);

    let (tx, rx) = mpsc::channel();
    let input = test.input.clone();
    let flusher = std::thread::spawn(move || tx.send(input.set_flushing(true)).unwrap());
    assert!(rx.recv_timeout(BLOCKED).is_err());

    assert_eq!(test.hardware.return_buffers(INPUT, 1), 1);
    assert!(rx.recv_timeout(BLOCKED).is_err());

    assert_eq!(test.hardware.return_buffers(INPUT, 1), 1);
    rx.recv_timeout(DONE).unwrap().unwrap();
    flusher.join().unwrap();

    assert_eq!(test.input.stats().pending, 3);
    assert_eq!(test.hardware.empties.load(Ordering::SeqCst), 2);
}

/// A buffer leased to the pipeline holds a flush up until it is released.
#[test]
fn flush_waits_for_leased_buffers() {
    let test = running_component("flush-lease");

    let leased = acquire(&test.input);
    let (tx, rx) = mpsc::channel();
    let input = test.input.clone();
    let flusher = std::thread::spawn(move || tx.send(input.set_flushing(true)).unwrap());
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(test.input.stats().leased, 1);

    // Released while flushing, the buffer stays with the port.
    test.input.release_buffer(leased).unwrap();
    rx.recv_timeout(DONE).unwrap().unwrap();
    flusher.join().unwrap();

    assert_eq!(
        test.input.stats(),
        PortStats {
            total: 3,
            pending: 3,
            ..Default::default()
        }
    );
    assert_eq!(test.hardware.empties.load(Ordering::SeqCst), 0);
    assert_eq!(test.hardware.frees.load(Ordering::SeqCst), 0);
}

#[test]
fn flush_waits_for_dropped_leases() {
    let test = running_component("flush-drop");

    assert_eq!(test.hardware.produce(OUTPUT, 1), 1);
    let leased = acquire(&test.output);
    let (tx, rx) = mpsc::channel();
    let output = test.output.clone();
    let flusher = std::thread::spawn(move || tx.send(output.set_flushing(true)).unwrap());
    assert!(rx.recv_timeout(BLOCKED).is_err());

    drop(leased);
    rx.recv_timeout(DONE).unwrap().unwrap();
    flusher.join().unwrap();
    assert_eq!(test.output.stats().pending, 3);
}

#[test]
fn flush_timeout_is_sticky() {
    let config = test_config().with_timeouts(Timeouts::uniform(Duration::from_millis(100)));
    let test = setup_test(
        "flush-timeout",
        vec![PortSetup::input(3), PortSetup::output(3)],
        config,
        None,
    );
    start(&test);
    test.hardware.set_hold_input(true);
    test.hardware.set_manual_flush(true);

    let buffer = acquire(&test.input);
    test.input.release_buffer(buffer).unwrap();

    let error = test.input.set_flushing(true).unwrap_err();
    assert!(error.is_timeout());
    assert_eq!(test.component.last_error(), Some(ErrorCode::TIMEOUT));
    assert!(matches!(
        test.output.acquire_buffer(),
        Err(Error::Fatal(ErrorCode::TIMEOUT))
    ));
}

#[test]
fn release_under_sticky_error_keeps_the_buffer() {
    let test = running_component("release-error");

    let buffer = acquire(&test.input);
    test.hardware.emit_error(ErrorCode::HARDWARE);
    assert!(common::wait_for(|| test.component.last_error().is_some()));

    assert!(matches!(
        test.input.release_buffer(buffer),
        Err(Error::Fatal(ErrorCode::HARDWARE))
    ));
    assert_eq!(test.input.stats().pending, 3);
    assert_eq!(test.hardware.empties.load(Ordering::SeqCst), 0);
}

#[test]
fn release_on_the_wrong_port_is_rejected() {
    let test = running_component("wrong-port");

    let buffer = acquire(&test.input);
    assert!(matches!(
        test.output.release_buffer(buffer),
        Err(Error::Other(_))
    ));
    // The rejected lease went back to its own port.
    assert_eq!(test.input.stats().pending, 3);
}

#[test]
fn leases_outliving_their_pool_are_stale() {
    let test = running_component("stale");

    let first = acquire(&test.input);
    let second = acquire(&test.input);
    test.input.deallocate_buffers().unwrap();
    assert_eq!(test.input.stats(), PortStats::default());
    assert_eq!(test.hardware.frees.load(Ordering::SeqCst), 1);

    assert!(matches!(
        test.input.release_buffer(first),
        Err(Error::StaleBuffer)
    ));
    assert_eq!(test.hardware.frees.load(Ordering::SeqCst), 2);
    drop(second);
    assert_eq!(test.hardware.frees.load(Ordering::SeqCst), 3);
    assert_eq!(test.component.last_error(), None);
}

#[test]
fn allocation_honours_the_minimum_count() {
    let test = setup_test(
        "minimum",
        vec![PortSetup::input(1), PortSetup::output(3)],
        test_config(),
        None,
    );

    test.input.allocate_buffers().unwrap();
    assert_eq!(test.input.stats().total, 2);
    assert_eq!(test.input.definition().unwrap().nBufferCountActual, 2);
    assert_eq!(test.hardware.allocations.load(Ordering::SeqCst), 2);

    assert!(matches!(test.input.allocate_buffers(), Err(Error::Other(_))));
    test.input.deallocate_buffers().unwrap();
    assert_eq!(test.hardware.live_buffers(), 0);
}

#[test]
fn port_operations_need_a_live_component() {
    let test = setup_test(
        "wrong-state",
        vec![PortSetup::input(3), PortSetup::output(3)],
        test_config(),
        None,
    );

    assert!(matches!(
        test.input.set_flushing(false),
        Err(Error::InvalidState(State::Loaded))
    ));
    assert!(matches!(
        test.output.set_enabled(false),
        Err(Error::InvalidState(State::Loaded))
    ));
    // Already flushing is a no-op in any state.
    test.input.set_flushing(true).unwrap();
}

#[test]
fn definition_updates_are_validated_by_the_hardware() {
    let test = setup_test(
        "definition",
        vec![PortSetup::input(3), PortSetup::output(3)],
        test_config(),
        None,
    );

    let mut definition = test.output.definition().unwrap();
    definition.nBufferCountActual = 5;
    let updated = test.output.update_definition(Some(&definition)).unwrap();
    assert_eq!(updated.nBufferCountActual, 5);

    definition.nBufferCountActual = 1;
    assert!(matches!(
        test.output.update_definition(Some(&definition)),
        Err(Error::Omx(ErrorCode::BAD_PARAMETER))
    ));
    assert_eq!(
        test.output.update_definition(None).unwrap().nBufferCountActual,
        5
    );
    assert_eq!(test.component.last_error(), None);
}
