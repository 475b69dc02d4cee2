//! QV scheduling order, publish/subscribe and the idle loop

use std::sync::Mutex;

use critical_section::CriticalSection;
use qp_core::{QError, QEvt, QPriority, QResult, QSignal, QTimeInterval};
use qp_mem::{EventPools, QMPool, QMemContext};
use qp_qep::{QStateReturn, StateDesc, StateId, StateTable};
use qp_qf::{QActiveDef, QActiveRunnable, QFsmActive, QTimeEvt};
use qp_qv::QV;

const LISTEN: StateId = StateId(1);

const JOB: QSignal = QSignal::new(30);
const NEWS: QSignal = QSignal::new(31);
const TICK: QSignal = QSignal::new(32);

type Log = Mutex<Vec<(&'static str, QSignal)>>;

/// Workspace shared by every listener: its tag and where to log
struct Listener {
    tag: &'static str,
    log: &'static Log,
}

fn listen(w: &mut Listener, e: &QEvt) -> QStateReturn {
    if !e.signal().is_reserved() {
        w.log.lock().unwrap().push((w.tag, e.signal()));
    }
    QStateReturn::Handled
}

static LISTENER: [StateDesc<Listener>; 2] = [
    StateDesc::top(),
    StateDesc::new("listen", StateId::TOP, listen),
];

fn def<const N: usize>(name: &'static str, prio: u8) -> QActiveDef<Listener, N> {
    QActiveDef::builder(name, StateTable::new(&LISTENER))
        .priority(prio)
        .initial(LISTEN)
        .build()
        .unwrap()
}

fn spawn<'a, const N: usize>(
    name: &'static str,
    prio: u8,
    log: &'static Log,
    mem: &'a QMemContext,
    pools: &'a EventPools,
) -> QFsmActive<'a, Listener, N> {
    let ws = Listener { tag: name, log };
    QFsmActive::create(&def::<N>(name, prio), ws, mem, pools).unwrap()
}

fn pools() -> EventPools {
    let pools = EventPools::new();
    pools.register(QMPool::new(32, 4).unwrap()).unwrap();
    pools
}

fn prio(p: u8) -> QPriority {
    QPriority::new(p).unwrap()
}

#[test]
fn highest_priority_dispatches_first() {
    static LOG: Log = Mutex::new(Vec::new());
    let mem = QMemContext::new(4096);
    let pools = pools();
    let low = spawn::<4>("low", 1, &LOG, &mem, &pools);
    let high = spawn::<4>("high", 5, &LOG, &mem, &pools);

    let mut qv = QV::new(&pools);
    qv.register(&low).unwrap();
    qv.register(&high).unwrap();

    low.post(&QEvt::constant(JOB)).unwrap();
    low.post(&QEvt::constant(NEWS)).unwrap();
    high.post(&QEvt::constant(JOB)).unwrap();
    assert_eq!(qv.ready_set().highest(), Some(prio(5)));

    assert_eq!(qv.run_until_idle(), Ok(3));
    assert_eq!(
        *LOG.lock().unwrap(),
        [("high", JOB), ("low", JOB), ("low", NEWS)]
    );
    assert!(qv.ready_set().is_empty());
    assert_eq!(qv.run_once(), Ok(false));
}

#[test]
fn registration_rules() {
    static LOG: Log = Mutex::new(Vec::new());
    let mem = QMemContext::new(4096);
    let pools = pools();
    let a = spawn::<2>("a", 2, &LOG, &mem, &pools);
    let b = spawn::<2>("b", 2, &LOG, &mem, &pools);

    let mut qv = QV::new(&pools);
    qv.register(&a).unwrap();
    assert_eq!(qv.register(&b), Err(QError::InvalidPriority));
    assert_eq!(qv.subscribe(prio(9), NEWS), Err(QError::ObjectInvalid));
    assert_eq!(qv.subscribe(prio(2), QSignal::EXIT), Err(QError::InvalidSignal));
    assert_eq!(qv.unregister(prio(9)), Err(QError::ObjectInvalid));

    qv.subscribe(prio(2), NEWS).unwrap();
    qv.unregister(prio(2)).unwrap();
    assert!(qv.is_empty());
    assert_eq!(qv.publish(&QEvt::constant(NEWS)), Ok(0));
}

/// Runnable whose priority never went through validation
struct Stray(QPriority);

impl QActiveRunnable for Stray {
    fn name(&self) -> &'static str {
        "stray"
    }

    fn priority(&self) -> QPriority {
        self.0
    }

    fn dispatch_one(&self) -> QResult<bool> {
        Ok(false)
    }

    fn has_events(&self) -> bool {
        false
    }

    fn post(&self, _: &QEvt) -> QResult<()> {
        Err(QError::QueueFull)
    }

    fn post_from_isr(&self, _: CriticalSection<'_>, _: &QEvt) -> QResult<()> {
        Err(QError::QueueFull)
    }

    fn post_lifo_from_isr(&self, _: CriticalSection<'_>, _: &QEvt) -> QResult<()> {
        Err(QError::QueueFull)
    }
}

#[test]
fn priorities_outside_the_ready_set_are_refused() {
    let pools = pools();
    let idle = Stray(QPriority::new_unchecked(0));
    let beyond = Stray(QPriority::new_unchecked(QPriority::MAX.raw() + 1));
    let highest = Stray(QPriority::MAX);

    let mut qv = QV::new(&pools);
    assert_eq!(qv.register(&idle), Err(QError::InvalidPriority));
    assert_eq!(qv.register(&beyond), Err(QError::InvalidPriority));
    assert!(qv.is_empty());

    qv.register(&highest).unwrap();
    assert_eq!(qv.len(), 1);
}

#[test]
fn published_event_is_reclaimed_after_last_subscriber() {
    static LOG: Log = Mutex::new(Vec::new());
    let mem = QMemContext::new(4096);
    let pools = pools();
    let a = spawn::<4>("a", 1, &LOG, &mem, &pools);
    let b = spawn::<4>("b", 2, &LOG, &mem, &pools);
    let c = spawn::<4>("c", 3, &LOG, &mem, &pools);

    let mut qv = QV::new(&pools);
    for ao in [&a, &b, &c] {
        qv.register(ao).unwrap();
    }
    qv.subscribe(prio(1), NEWS).unwrap();
    qv.subscribe(prio(3), NEWS).unwrap();

    let news = pools.create(16, NEWS).unwrap();
    assert_eq!(qv.publish(&news), Ok(2));
    let header = pools.header(&news).unwrap();
    assert_eq!(header.ref_count, 2);
    assert!(!b.has_events());

    assert_eq!(qv.run_once(), Ok(true));
    assert!(pools.is_live(&news));
    assert_eq!(qv.run_until_idle(), Ok(1));
    assert!(!pools.is_live(&news));
    assert_eq!(*LOG.lock().unwrap(), [("c", NEWS), ("a", NEWS)]);

    // nobody listens to JOB: the event goes straight back to its pool
    let job = pools.create(16, JOB).unwrap();
    assert_eq!(qv.publish(&job), Ok(0));
    assert!(!pools.is_live(&job));
}

#[test]
fn failed_delivery_is_reported_but_others_still_receive() {
    static LOG: Log = Mutex::new(Vec::new());
    let mem = QMemContext::new(4096);
    let pools = pools();
    let small = spawn::<1>("small", 4, &LOG, &mem, &pools);
    let big = spawn::<4>("big", 1, &LOG, &mem, &pools);

    let mut qv = QV::new(&pools);
    qv.register(&small).unwrap();
    qv.register(&big).unwrap();
    qv.subscribe(prio(4), NEWS).unwrap();
    qv.subscribe(prio(1), NEWS).unwrap();

    small.post(&QEvt::constant(JOB)).unwrap();
    let news = pools.create(8, NEWS).unwrap();
    assert_eq!(qv.publish(&news), Err(QError::QueueFull));
    assert_eq!(pools.header(&news).unwrap().ref_count, 1);

    qv.run_until_idle().unwrap();
    assert!(!pools.is_live(&news));
    assert_eq!(*LOG.lock().unwrap(), [("small", JOB), ("big", NEWS)]);
}

#[test]
fn idle_hook_drives_time_events() {
    static LOG: Log = Mutex::new(Vec::new());
    let mem = QMemContext::new(4096);
    let pools = pools();
    let ao = spawn::<2>("ticker", 1, &LOG, &mem, &pools);
    let mut qv = QV::new(&pools);
    qv.register(&ao).unwrap();

    let timer = QTimeEvt::new(TICK);
    timer.arm(QTimeInterval::periodic(3)).unwrap();

    let mut idles = 0;
    qv.run(|| {
        idles += 1;
        timer.tick(&ao).unwrap();
        idles <= 12
    })
    .unwrap();
    drop(qv);

    assert_eq!(LOG.lock().unwrap().len(), 4);
    assert!(LOG.lock().unwrap().iter().all(|&(_, sig)| sig == TICK));
    assert_eq!(ao.destroy().map(|w| w.tag), Ok("ticker"));
    assert_eq!(mem.used(), 0);
}
