//! Stand-in estimator publishing C3 states and targets, for running the bridge without hardware

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use comms_if::{
    mpc::{encode_frame, C3StateMsg, C3_STATE_LEN},
    net::{zmq, MonitoredSocket, SocketOptions},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = zmq::Context::new();

    let socket_options = SocketOptions {
        bind: true,
        block_on_first_connect: false,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(&ctx, zmq::PUB, socket_options, "tcp://*:5100")?;

    println!("Estimator publisher open on port 5100");

    // Object resting at the origin, actor circling it
    let target = C3StateMsg {
        utime: 0,
        state: vec![0.45, 0.0, 0.132, 1.0, 0.0, 0.0, 0.0, 0.45, 0.1, 0.032],
    };
    let mut final_target = target.clone();
    final_target.state[8] = 0.2;

    let mut i: u64 = 0;

    loop {
        let utime = SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros() as i64;
        let phase = 0.01 * i as f64;

        let mut state = vec![0.0; C3_STATE_LEN];
        state[0] = 0.4 + 0.05 * phase.cos();
        state[1] = 0.05 * phase.sin();
        state[2] = 0.032;
        state[3] = 1.0;
        state[7..10].copy_from_slice(&[0.45, 0.0, 0.032]);
        state[10] = -0.05 * phase.sin();
        state[11] = 0.05 * phase.cos();

        let frame = encode_frame("C3_ACTUAL", &C3StateMsg { utime, state })?;
        if let Err(e) = socket.send(&frame, 0) {
            println!("Failed to send state: {}", e);
        }

        // Targets change far less often than the state
        if i % 100 == 0 {
            let targets = [("C3_TARGET", &target), ("C3_FINAL_TARGET", &final_target)];
            for (channel, msg) in targets.iter() {
                let stamped = C3StateMsg {
                    utime,
                    state: msg.state.clone(),
                };
                socket.send(&encode_frame(channel, &stamped)?, 0).ok();
            }
        }

        i += 1;
        std::thread::sleep(Duration::from_millis(10));
    }
}
