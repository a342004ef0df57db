mod state;

pub use state::RunState;
