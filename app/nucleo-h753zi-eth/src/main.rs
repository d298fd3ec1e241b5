// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw Ethernet on a Nucleo-H753ZI (or -H743ZI2).
//!
//! Brings up the on-board LAN8742A, then once a second broadcasts a small
//! IPv4-typed frame and drains whatever has arrived. There's no console;
//! attach a debugger and look at the ring buffers and `Stats`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
mod firmware {
    // Halt on panic; break on `rust_begin_unwind` to catch one.
    extern crate panic_halt;

    // We have to do this if we don't otherwise use it to ensure its vector
    // table gets linked in.
    extern crate stm32h7;

    cfg_if::cfg_if! {
        if #[cfg(feature = "h743")] {
            use stm32h7::stm32h743 as device;
        } else if #[cfg(feature = "h753")] {
            use stm32h7::stm32h753 as device;
        } else {
            compile_error!("enable one of the h743 or h753 features");
        }
    }

    use cortex_m_rt::entry;
    use drv_stm32h7_eth::frame::{self, EtherType, MacAddress};
    use drv_stm32h7_eth::{
        bring_up, BringUpError, Config, EthRegisters, MdioClock, RxStorage,
        SendError, Stats, TxStorage, BUFSZ,
    };
    use ringbuf::{ringbuf, ringbuf_entry};

    /// Out of reset the H7 runs from HSI at 64 MHz with no AHB prescaler, and
    /// this program doesn't touch the PLLs.
    const HCLK: u32 = 64_000_000;
    const CYCLES_PER_SECOND: u32 = HCLK;

    const AF11_ETH: u32 = 11;

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Trace {
        None,
        BringUpFailed(BringUpError),
        Sent(usize),
        TxBusy,
        Received { len: usize, ethertype: u16 },
        Stats(Stats),
    }

    ringbuf!(Trace, 32, Trace::None);

    static TX_STORAGE: TxStorage<4> = TxStorage::new();
    static RX_STORAGE: RxStorage<4> = RxStorage::new();

    /// Puts each of `pins` on `port` into alternate function `af`: very high
    /// speed, push-pull, no pulls.
    fn set_alternate(
        port: &device::gpioa::RegisterBlock,
        pins: &[u32],
        af: u32,
    ) {
        for &pin in pins {
            let two = pin * 2;
            port.moder.modify(|r, w| unsafe {
                w.bits(r.bits() & !(0b11 << two) | 0b10 << two)
            });
            port.ospeedr
                .modify(|r, w| unsafe { w.bits(r.bits() | 0b11 << two) });
            port.pupdr
                .modify(|r, w| unsafe { w.bits(r.bits() & !(0b11 << two)) });
            port.otyper
                .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << pin)) });

            let four = (pin % 8) * 4;
            let afr = |bits: u32| bits & !(0xF << four) | af << four;
            if pin < 8 {
                port.afrl.modify(|r, w| unsafe { w.bits(afr(r.bits())) });
            } else {
                port.afrh.modify(|r, w| unsafe { w.bits(afr(r.bits())) });
            }
        }
    }

    /// Clocks, reset, RMII selection, and pins for the Ethernet peripheral.
    fn board_init(p: &device::Peripherals) {
        p.RCC.ahb4enr.modify(|_, w| {
            w.gpioaen()
                .enabled()
                .gpioben()
                .enabled()
                .gpiocen()
                .enabled()
                .gpiogen()
                .enabled()
        });

        // RMII has to be selected while the MAC is held in reset, so the
        // interface choice is latched when it comes out.
        p.RCC.apb4enr.modify(|_, w| w.syscfgen().enabled());
        cortex_m::asm::dmb();
        p.RCC.ahb1rstr.modify(|_, w| w.eth1macrst().set_bit());
        p.SYSCFG.pmcr.modify(|_, w| unsafe { w.epis().bits(0b100) });

        p.RCC.ahb1enr.modify(|_, w| {
            w.eth1macen()
                .set_bit()
                .eth1txen()
                .set_bit()
                .eth1rxen()
                .set_bit()
        });
        cortex_m::asm::dmb();
        p.RCC.ahb1rstr.modify(|_, w| w.eth1macrst().clear_bit());

        // Nucleo-H7 RMII wiring:
        //   PA1 REF_CLK, PA2 MDIO, PA7 CRS_DV
        //   PB13 TXD1
        //   PC1 MDC, PC4 RXD0, PC5 RXD1
        //   PG11 TX_EN, PG13 TXD0
        set_alternate(&p.GPIOA, &[1, 2, 7], AF11_ETH);
        set_alternate(&p.GPIOB, &[13], AF11_ETH);
        set_alternate(&p.GPIOC, &[1, 4, 5], AF11_ETH);
        set_alternate(&p.GPIOG, &[11, 13], AF11_ETH);
    }

    #[entry]
    fn main() -> ! {
        let mut cp = cortex_m::Peripherals::take().unwrap();
        let p = device::Peripherals::take().unwrap();

        cp.SCB.enable_icache();
        cp.SCB.enable_dcache(&mut cp.CPUID);

        board_init(&p);

        let config = Config {
            mdio_clock: MdioClock::for_hclk(HCLK).unwrap_or_default(),
            ..Config::default()
        };
        // Safety: the driver is the only thing in this program that touches
        // the Ethernet registers.
        let regs = unsafe { EthRegisters::stm32h7() };
        let mut eth = match bring_up(regs, &config, &TX_STORAGE, &RX_STORAGE)
        {
            Ok(eth) => eth,
            Err(e) => {
                ringbuf_entry!(Trace::BringUpFailed(e));
                loop {
                    cortex_m::asm::wfi();
                }
            }
        };

        let mut hello = [0; BUFSZ];
        let hello_len = frame::build(
            &mut hello,
            MacAddress::BROADCAST,
            config.mac_address,
            EtherType::IPV4,
            b"Hello Ethernet!\0",
        )
        .unwrap();
        let hello = &hello[..hello_len];

        let mut rx = [0; BUFSZ];
        loop {
            match eth.send(hello) {
                Ok(()) => ringbuf_entry!(Trace::Sent(hello.len())),
                Err(SendError::Busy) => ringbuf_entry!(Trace::TxBusy),
                Err(SendError::TooLong | SendError::Empty) => unreachable!(),
            }

            cortex_m::asm::delay(CYCLES_PER_SECOND);

            // Bad frames read as 0 but still free their slot, so keep going
            // until the DMA owns the next one.
            while eth.can_recv() {
                let len = eth.receive(&mut rx);
                if len == 0 {
                    continue;
                }
                let ethertype = frame::parse(&rx[..len])
                    .map_or(0, |(hdr, _)| hdr.ethertype().0);
                ringbuf_entry!(Trace::Received { len, ethertype });
            }
            ringbuf_entry!(Trace::Stats(eth.stats()));
        }
    }
}
