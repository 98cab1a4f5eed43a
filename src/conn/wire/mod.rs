mod header;
mod message;
#[cfg(test)]
mod test;
mod util;

pub(crate) use self::{
    header::{Header, OpCode},
    message::{DocumentSequence, Message, MessageFlags},
    util::next_request_id,
};

#[cfg(test)]
pub(crate) use self::test::scan_sections;
