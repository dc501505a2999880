use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A fault injected into the handling of one valid data packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Treat the packet as damaged and answer with a NACK.
    Damage,
    /// Act as if the packet never arrived.
    DropPacket,
    /// Process the packet but withhold its ACK.
    DropAck,
}

/// Decides, packet by packet, whether the server simulates an unreliable network.
pub trait FaultPolicy {
    fn on_data(&mut self) -> Fault;
}

/// Never injects a fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl FaultPolicy for NoFaults {
    fn on_data(&mut self) -> Fault {
        Fault::None
    }
}

/// Injects faults independently per packet.
///
/// A packet is damaged with probability `damage_rate`. Otherwise it is lost with probability
/// `loss_rate`, the loss falling evenly on the packet itself or on its ACK.
#[derive(Clone, Debug)]
pub struct RandomFaults<R = StdRng> {
    damage_rate: f64,
    loss_rate: f64,
    rng: R,
}

/// Fault rate used by the server's simulation switches.
pub const SIMULATED_FAULT_RATE: f64 = 0.1;

impl RandomFaults<StdRng> {
    /// Both rates must lie in `0.0..=1.0`.
    pub fn new(damage_rate: f64, loss_rate: f64) -> Self {
        Self::with_rng(damage_rate, loss_rate, StdRng::from_entropy())
    }
}

impl<R> RandomFaults<R>
where
    R: Rng,
{
    pub fn with_rng(damage_rate: f64, loss_rate: f64, rng: R) -> Self {
        assert!(
            (0.0..=1.0).contains(&damage_rate),
            "invalid damage rate: {}",
            damage_rate
        );
        assert!(
            (0.0..=1.0).contains(&loss_rate),
            "invalid loss rate: {}",
            loss_rate
        );

        Self {
            damage_rate,
            loss_rate,
            rng,
        }
    }
}

impl<R> FaultPolicy for RandomFaults<R>
where
    R: Rng,
{
    fn on_data(&mut self) -> Fault {
        if self.rng.gen_bool(self.damage_rate) {
            Fault::Damage
        } else if self.rng.gen_bool(self.loss_rate) {
            if self.rng.gen_bool(0.5) {
                Fault::DropPacket
            } else {
                Fault::DropAck
            }
        } else {
            Fault::None
        }
    }
}

impl<T> FaultPolicy for Box<T>
where
    T: FaultPolicy + ?Sized,
{
    fn on_data(&mut self) -> Fault {
        (**self).on_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rates_never_fault() {
        let mut faults = RandomFaults::with_rng(0.0, 0.0, StdRng::seed_from_u64(1));
        assert!((0..1000).all(|_| faults.on_data() == Fault::None));
    }

    #[test]
    fn certain_damage() {
        let mut faults = RandomFaults::with_rng(1.0, 1.0, StdRng::seed_from_u64(2));
        assert!((0..100).all(|_| faults.on_data() == Fault::Damage));
    }

    #[test]
    fn certain_loss_splits_between_packet_and_ack() {
        let mut faults = RandomFaults::with_rng(0.0, 1.0, StdRng::seed_from_u64(3));

        let mut drops = [0usize; 2];
        for _ in 0..1000 {
            match faults.on_data() {
                Fault::DropPacket => drops[0] += 1,
                Fault::DropAck => drops[1] += 1,
                other => panic!("unexpected fault {:?}", other),
            }
        }

        assert!(drops[0] > 350 && drops[1] > 350, "{:?}", drops);
    }

    #[test]
    fn rates_roughly_honored() {
        let mut faults = RandomFaults::with_rng(0.1, 0.0, StdRng::seed_from_u64(4));

        let damaged = (0..10_000)
            .filter(|_| faults.on_data() == Fault::Damage)
            .count();

        assert!((700..1300).contains(&damaged), "{} damaged", damaged);
    }

    #[test]
    #[should_panic]
    fn rate_out_of_range() {
        RandomFaults::new(1.5, 0.0);
    }
}
