//! Kernel Scenarios
//!
//! End-to-end runs of the simulated kernel: message passing between
//! application tasks, the dispatcher fast path, crash isolation and the
//! kernel error path.

use core_types::{SysEvents, SysHandle, TaskId};
use ipc::IpcError;
use kernel_api::{Duration, Instant, KernelError};
use sim_kernel::fault_injection::{FaultPlan, IpcFault, LifecycleFault, INJECTED_FAULT};
use sim_kernel::test_utils::{fn_task, kernel_with_source, IdleTask};
use sim_kernel::{Postmortem, PushedCall, SimulatedKernel, TaskStep, TermReason};
use std::cell::RefCell;
use std::rc::Rc;
use tests_resilience::echo_task;

fn task(raw: u8) -> TaskId {
    TaskId::new(raw).unwrap()
}

#[test]
fn test_message_between_application_tasks() {
    let mut kernel = SimulatedKernel::default();
    let log = Rc::new(RefCell::new(Vec::new()));

    let receiver_log = log.clone();
    let receiver = kernel
        .create_task(fn_task(move |ctx| {
            let from = SysHandle::ipc(task(2));
            if !ctx.signalled().read_ready.contains(from) {
                ctx.ipc_register(task(2), None);
                return TaskStep::wait(SysEvents::read(from), Instant::INFINITE);
            }
            let msg = ctx.ipc_try_receive().unwrap();
            receiver_log
                .borrow_mut()
                .push((msg.remote, msg.fn_id, msg.data.clone()));
            ctx.ipc_free(&msg).unwrap();
            assert_eq!(ctx.ipc_try_receive(), Err(IpcError::Empty));
            TaskStep::Exit(0)
        }))
        .unwrap();
    let sender = kernel
        .create_task(fn_task(|ctx| {
            ctx.ipc_send(task(1), 42, b"hi").unwrap();
            TaskStep::Exit(0)
        }))
        .unwrap();
    assert_eq!((receiver, sender), (task(1), task(2)));

    kernel.yield_to(receiver).unwrap();
    assert!(kernel.is_waiting(receiver));
    kernel.yield_to(sender).unwrap();
    kernel.sleep(Duration::from_millis(1)).unwrap();

    assert_eq!(log.borrow().as_slice(), &[(task(2), 42, b"hi".to_vec())]);
    assert_eq!(kernel.postmortem(receiver), Some(&Postmortem::exit(0, false)));
    assert_eq!(kernel.task_count(), 0);
}

#[test]
fn test_message_outlives_its_sender() {
    let mut kernel = SimulatedKernel::default();
    let sender = kernel
        .create_task(fn_task(|ctx| {
            ctx.ipc_send(TaskId::KERNEL, 7, b"last words").unwrap();
            ctx.ipc_send(TaskId::KERNEL, 8, b"unread").unwrap();
            TaskStep::Exit(0)
        }))
        .unwrap();
    kernel.ipc_register(sender, None);
    kernel.yield_to(sender).unwrap();
    assert!(!kernel.is_alive(sender));

    let msg = kernel.ipc_try_receive_from(sender).unwrap();
    assert_eq!((msg.fn_id, msg.data.as_slice()), (7, &b"last words"[..]));
    kernel.ipc_free(&msg).unwrap();

    // the id comes back with an empty queue
    assert_eq!(kernel.create_task(IdleTask).unwrap(), sender);
    assert_eq!(
        kernel.ipc_try_receive_from(sender),
        Err(KernelError::Ipc(IpcError::Empty))
    );
}

#[test]
fn test_task_calls_another_task() {
    let mut kernel = SimulatedKernel::default();
    let echo = kernel.create_task(echo_task(task(2))).unwrap();
    let replies = Rc::new(RefCell::new(Vec::new()));
    let seen = replies.clone();
    let caller = kernel
        .create_task(fn_task(move |ctx| {
            let from_echo = SysHandle::ipc(task(1));
            if ctx.signalled().read_ready.contains(from_echo) {
                let reply = ctx.ipc_try_receive_from(task(1)).unwrap();
                seen.borrow_mut().push((reply.fn_id, reply.data.clone()));
                ctx.ipc_free(&reply).unwrap();
                return TaskStep::Exit(0);
            }
            ctx.ipc_register(task(1), None);
            ctx.ipc_call(task(1), 7, b"ping", Duration::from_millis(30))
                .unwrap()
        }))
        .unwrap();
    assert_eq!((echo, caller), (task(1), task(2)));

    kernel.yield_to(echo).unwrap();
    kernel.yield_to(caller).unwrap();
    assert!(kernel.is_waiting(caller));
    kernel.sleep(Duration::from_millis(10)).unwrap();

    assert_eq!(replies.borrow().as_slice(), &[(8, b"gnip".to_vec())]);
    assert!(!kernel.is_alive(caller));
    assert!(kernel.is_waiting(echo));
}

#[test]
fn test_task_call_times_out() {
    let mut kernel = SimulatedKernel::default();
    let silent = kernel
        .create_task(fn_task(|ctx| {
            ctx.ipc_register(task(2), None);
            TaskStep::wait(SysEvents::NONE, Instant::INFINITE)
        }))
        .unwrap();
    let outcome = Rc::new(RefCell::new(None));
    let seen = outcome.clone();
    let mut calls = 0;
    let caller = kernel
        .create_task(fn_task(move |ctx| {
            calls += 1;
            if calls == 1 {
                ctx.ipc_register(task(1), None);
                return ctx
                    .ipc_call(task(1), 3, b"?", Duration::from_millis(30))
                    .unwrap();
            }
            *seen.borrow_mut() = Some((ctx.signalled(), ctx.now()));
            TaskStep::Exit(0)
        }))
        .unwrap();
    kernel.yield_to(silent).unwrap();
    kernel.yield_to(caller).unwrap();
    let sent_at = kernel.now();

    kernel.sleep(Duration::from_millis(100)).unwrap();
    let (signalled, resumed_at) = (*outcome.borrow()).unwrap();
    assert!(signalled.is_empty());
    assert!(resumed_at >= sent_at + Duration::from_millis(30));
    assert!(!kernel.is_alive(caller));
}

#[test]
fn test_pushed_call_keeps_wakeup_events() {
    let (mut kernel, source) = kernel_with_source(SysHandle::BUTTON);
    let woken = Rc::new(RefCell::new(Vec::new()));
    let log = woken.clone();
    let id = kernel
        .create_task(fn_task(move |ctx| {
            log.borrow_mut().push(ctx.signalled());
            if ctx.signalled().read_ready.contains(SysHandle::BUTTON) {
                TaskStep::wait(SysEvents::read(SysHandle::USB_WIRE), Instant::INFINITE)
            } else {
                TaskStep::wait(SysEvents::read(SysHandle::BUTTON), Instant::INFINITE)
            }
        }))
        .unwrap();
    kernel.yield_to(id).unwrap();
    kernel.push_call(id, PushedCall::new(0x10, 5, 0, 0)).unwrap();

    source.borrow_mut().set_read_ready(SysHandle::BUTTON, true);
    kernel.sleep(Duration::from_millis(5)).unwrap();

    let woken = woken.borrow();
    assert_eq!(woken.len(), 2);
    assert!(woken[1].read_ready.contains(SysHandle::BUTTON));
    assert!(kernel.is_waiting(id));
    assert_eq!(kernel.push_call(id, PushedCall::new(0x11, 0, 0, 0)), Ok(()));
}

#[test]
fn test_kernel_poll_returns_ready_handle_immediately() {
    let (mut kernel, source) = kernel_with_source(SysHandle::BUTTON);
    source.borrow_mut().set_read_ready(SysHandle::BUTTON, true);
    let before = kernel.now();

    let signalled = kernel
        .poll(SysEvents::read(SysHandle::BUTTON), Instant::INFINITE)
        .unwrap();
    assert!(signalled.read_ready.contains(SysHandle::BUTTON));
    assert_eq!(kernel.now(), before);
    assert_eq!(kernel.poller_count(), 0);
}

#[test]
fn test_kernel_call_answered_by_echo_task() {
    let mut kernel = SimulatedKernel::default();
    let echo = kernel.create_task(echo_task(TaskId::KERNEL)).unwrap();
    kernel.yield_to(echo).unwrap();
    kernel.ipc_register(echo, None);

    for (fn_id, payload) in [(10u16, &b"abc"[..]), (20, &b"wallet"[..])] {
        let reply = kernel
            .ipc_call(echo, fn_id, payload, Duration::from_millis(50))
            .unwrap();
        let mut expected = payload.to_vec();
        expected.reverse();
        assert_eq!(reply.fn_id, fn_id + 1);
        assert_eq!(reply.data, expected);
        kernel.ipc_free(&reply).unwrap();
    }
    assert!(kernel.is_waiting(echo));
}

#[test]
fn test_call_to_dead_task_fails() {
    let mut kernel = SimulatedKernel::default();
    let echo = kernel.create_task(echo_task(TaskId::KERNEL)).unwrap();
    kernel.yield_to(echo).unwrap();
    kernel.ipc_register(echo, None);
    kernel.exit(echo, 1).unwrap();

    assert_eq!(
        kernel.ipc_call(echo, 1, b"?", Duration::from_millis(10)),
        Err(KernelError::Ipc(IpcError::NotRegistered))
    );
}

#[test]
fn test_crashing_task_leaves_peers_running() {
    let plan = FaultPlan::new()
        .with_lifecycle_fault(LifecycleFault::CrashAfterResumes { task: task(1), count: 3 });
    let mut kernel = SimulatedKernel::default().with_fault_plan(plan);
    let crasher = kernel.create_task(IdleTask).unwrap();
    let steady = kernel.create_task(IdleTask).unwrap();
    kernel.yield_to(crasher).unwrap();
    kernel.yield_to(steady).unwrap();

    kernel.sleep(Duration::from_millis(20)).unwrap();

    assert!(!kernel.is_alive(crasher));
    assert_eq!(
        kernel.postmortem(crasher),
        Some(&Postmortem::fault(INJECTED_FAULT, false))
    );
    assert!(kernel.is_alive(steady));
    assert!(!kernel.is_halted());

    // the freed id is handed out again
    assert_eq!(kernel.create_task(IdleTask).unwrap(), crasher);
}

#[test]
fn test_corrupted_item_resets_queue() {
    let plan = FaultPlan::new().with_ipc_fault(IpcFault::CorruptNextItem {
        target: TaskId::KERNEL,
        origin: task(1),
        size: 4096,
    });
    let mut kernel = SimulatedKernel::default().with_fault_plan(plan);
    let sender = kernel
        .create_task(fn_task(|ctx| {
            ctx.ipc_send(TaskId::KERNEL, 1, b"first").unwrap();
            TaskStep::Yield
        }))
        .unwrap();
    kernel.ipc_register(sender, Some(128));
    kernel.yield_to(sender).unwrap();

    assert!(matches!(
        kernel.ipc_try_receive_from(sender),
        Err(KernelError::Ipc(IpcError::Corrupted { .. }))
    ));
    assert_eq!(kernel.ipc_queue_free_space(TaskId::KERNEL, sender), Some(128));

    kernel.yield_to(sender).unwrap();
    let msg = kernel.ipc_try_receive_from(sender).unwrap();
    assert_eq!(msg.data, b"first");
    kernel.ipc_free(&msg).unwrap();
}

#[test]
fn test_task_ids_run_out_and_come_back() {
    let mut kernel = SimulatedKernel::default();
    let ids: Vec<TaskId> = (0..3)
        .map(|_| kernel.create_task(IdleTask).unwrap())
        .collect();
    assert_eq!(ids, vec![task(1), task(2), task(3)]);
    assert_eq!(
        kernel.create_task(IdleTask).err(),
        Some(KernelError::NoFreeTaskId)
    );

    kernel.exit(task(2), 0).unwrap();
    assert_eq!(kernel.create_task(IdleTask).unwrap(), task(2));
}

#[test]
fn test_kernel_error_reaches_handler_once() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut kernel = SimulatedKernel::default()
        .with_error_handler(move |pm: &Postmortem| sink.borrow_mut().push(pm.clone()));
    kernel.create_task(IdleTask).unwrap();

    let long_title = "T".repeat(100);
    assert_eq!(
        kernel.exit_error(TaskId::KERNEL, &long_title, "storage failed", "restart"),
        Err(KernelError::Halted)
    );
    assert_eq!(
        kernel.poll(SysEvents::NONE, Instant::ZERO),
        Err(KernelError::Halted)
    );
    assert_eq!(kernel.exit(TaskId::KERNEL, 0), Err(KernelError::Halted));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].privileged);
    match &seen[0].reason {
        TermReason::Error { title, message, .. } => {
            assert_eq!(title.len(), 63);
            assert_eq!(message, "storage failed");
        }
        other => panic!("unexpected reason {:?}", other),
    }
}
