mod encode;
mod header;
mod login;
mod prelogin;

pub(crate) use encode::*;
pub(crate) use header::*;
pub(crate) use login::*;
pub(crate) use prelogin::*;

/// Length in bytes of the ALL_HEADERS prologue a SQL batch carries in front
/// of its text: total length (4), header length (4), header type (2),
/// transaction descriptor (8) and outstanding request count (4).
pub(crate) const ALL_HEADERS_LEN_TX: usize = 22;

/// Token announcing a successful login in the first response byte after the
/// packet header.
pub(crate) const TOKEN_LOGIN_ACK: u8 = 0xAD;

#[derive(Debug)]
#[repr(u16)]
#[allow(dead_code)]
pub(crate) enum AllHeaderTy {
    QueryDescriptor = 1,
    TransactionDescriptor = 2,
    TraceActivity = 3,
}
