/// For narrowing casts of lengths that were checked against a wire limit before (ack counts,
///  extra header length). NB: The implementations panic if the check was missed.
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<u8> for usize {
    fn prechecked_cast(self) -> u8 {
        self.try_into().expect("this is a bug: length should have been checked against the wire limit")
    }
}
