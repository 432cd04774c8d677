use grading::assert_exit_code;
use kestrel::thread::{Current, ThreadBuilder};
use kestrel_threads::{communicator::Communicator, sync::Mutex};
use rand::Rng;
use std::sync::Arc;

#[test]
fn listener_first() {
    let comm = Arc::new(Communicator::new());
    let listener = {
        let comm = comm.clone();
        ThreadBuilder::new("listener")
            .spawn(move || Current::exit(comm.listen()))
            .unwrap()
    };
    while comm.pending() != (0, 1) {
        Current::yield_now();
    }
    comm.speak(42);
    assert_eq!(listener.join(), 42);
    assert_eq!(comm.pending(), (0, 0));
}

#[test]
fn speaker_first() {
    let comm = Arc::new(Communicator::new());
    let speaker = {
        let comm = comm.clone();
        ThreadBuilder::new("speaker")
            .spawn(move || comm.speak(-7))
            .unwrap()
    };
    while comm.pending() != (1, 0) {
        Current::yield_now();
    }
    assert_eq!(comm.listen(), -7);
    assert_eq!(speaker.join(), 0);
    assert_eq!(comm.pending(), (0, 0));
}

#[test]
#[assert_exit_code(0)]
fn many_speakers_many_listeners() {
    const N: usize = 16;
    let comm = Arc::new(Communicator::new());
    let heard = Arc::new(Mutex::new(Vec::new()));
    let mut rng = rand::thread_rng();

    let mut handles = Vec::new();
    for i in 0..N as i32 {
        // Interleave the arrival of speakers and listeners randomly.
        let speak_first = rng.gen_bool(0.5);
        for speaker in [speak_first, !speak_first] {
            let comm = comm.clone();
            let heard = heard.clone();
            let handle = if speaker {
                ThreadBuilder::new("speaker").spawn(move || comm.speak(i))
            } else {
                ThreadBuilder::new("listener").spawn(move || {
                    let word = comm.listen();
                    let mut guard = heard.lock();
                    guard.push(word);
                    guard.unlock();
                })
            };
            handles.push(handle.unwrap());
        }
        let (speakers, listeners) = comm.pending();
        assert!(speakers == 0 || listeners == 0);
    }
    for h in handles {
        assert_eq!(h.join(), 0);
    }

    assert_eq!(comm.pending(), (0, 0));
    let mut guard = heard.lock();
    guard.sort();
    assert_eq!(&*guard, &(0..N as i32).collect::<Vec<_>>());
    guard.unlock();
}
