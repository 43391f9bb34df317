mod child;
mod pid;

pub use child::{finish_child, kill_child};
pub use pid::{kill_pid, pid_exists};
