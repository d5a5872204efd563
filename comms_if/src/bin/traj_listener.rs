//! Subscribes to the bridge's trajectory channels and prints a summary of each bundle

use comms_if::{
    mpc::{decode_payload, split_frame, TimestampedSavedTraj},
    net::{zmq, MonitoredSocket, SocketOptions},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = zmq::Context::new();

    let socket_options = SocketOptions {
        block_on_first_connect: false,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(&ctx, zmq::SUB, socket_options, "tcp://localhost:5101")?;

    socket.set_subscribe(b"TRACKING_TRAJECTORY_ACTOR ")?;
    socket.set_subscribe(b"TRACKING_TRAJECTORY_OBJECT ")?;

    loop {
        let frame = match socket.recv_string(0)? {
            Ok(f) => f,
            Err(_) => {
                println!("Got a non UTF-8 frame");
                continue;
            }
        };

        let (channel, payload) = split_frame(&frame)?;
        let msg: TimestampedSavedTraj = decode_payload(channel, payload)?;

        println!("{} (utime {}):", channel, msg.utime);
        for block in msg.saved_traj.trajectories.iter() {
            let first: Vec<f64> = block
                .datapoints
                .iter()
                .filter_map(|d| d.first().copied())
                .collect();
            println!(
                "    {} [{} points] {:?} = {:.4?}",
                block.trajectory_name, block.num_points, block.datatypes, first
            );
        }
    }
}
