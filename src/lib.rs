pub mod base {
    pub mod behavior;
    pub mod module;
    pub mod port;
}
pub mod coherence;
pub mod sim {
    pub mod cache;
    pub mod config;
    pub mod interleave;
    pub mod log;
    pub mod node;
    pub mod top;
    pub mod trace;

    #[cfg(test)]
    mod unit_tests;
}
pub mod timeq;
