pub mod ms {
    /// WAIT_TIME from spec §4.3: poll interval while waiting on browser bring-up.
    pub const BROWSER_POLL: u64 = 500;
    pub const CDP_TAB_LIST_POLL: u64 = 500;
}

pub mod secs {
    /// Manager tick quantum from spec §4.5/§5.
    pub const MANAGER_TICK: u64 = 10;
    pub const HTTP_REQUEST: u64 = 30;
}
