//! U-shaped sub-network used at every cascade stage.

use candle_core::{ModuleT, Result, Tensor, bail};
use candle_nn::{Activation, VarBuilder};

use crate::nn::{
    aspp::AsppModule, conv_block::ConvBlock, decoder::Decoder, encoder::Encoder,
    lstm_module::LstmModule,
};

/// Encoder widths as multiples of `nout`, shallowest first.
const WIDTHS: [usize; 5] = [1, 2, 4, 6, 8];

/// Input and output channels of each decoder, deepest first.
///
/// Every decoder consumes the previous stage's output plus its skip
/// connection; the last one also takes the single recurrent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPlan {
    pub dec4: (usize, usize),
    pub dec3: (usize, usize),
    pub dec2: (usize, usize),
    pub dec1: (usize, usize),
}

/// Encoder -> ASPP -> decoder network with a recurrent channel injected
/// before the last decoder.
///
/// (batch, nin, H, W) -> (batch, nout, H, W)
#[derive(Debug, Clone)]
pub struct BaseNet {
    enc1: ConvBlock,
    enc2: Encoder,
    enc3: Encoder,
    enc4: Encoder,
    enc5: Encoder,
    aspp: AsppModule,
    dec4: Decoder,
    dec3: Decoder,
    dec2: Decoder,
    lstm_dec2: LstmModule,
    dec1: Decoder,
    name: String,
}

impl BaseNet {
    /// Decoder channel arithmetic for a base width.
    pub fn channel_plan(nout: usize) -> ChannelPlan {
        let [w1, w2, w3, w4, w5] = WIDTHS.map(|w| w * nout);
        ChannelPlan {
            dec4: (w5 + w4, w4),
            dec3: (w4 + w3, w3),
            dec2: (w3 + w2, w2),
            dec1: (w2 + 1 + w1, w1),
        }
    }

    pub fn new(
        nin: usize,
        nout: usize,
        nin_lstm: usize,
        nout_lstm: usize,
        dilations: &[(usize, usize)],
        vb: VarBuilder,
    ) -> Result<Self> {
        if nin == 0 || nout == 0 || nin_lstm == 0 {
            bail!(
                "BaseNet at {} needs non-zero widths, got nin={nin} nout={nout} nin_lstm={nin_lstm}",
                vb.prefix()
            );
        }
        let [w1, w2, w3, w4, w5] = WIDTHS.map(|w| w * nout);
        let plan = Self::channel_plan(nout);

        let enc1 = ConvBlock::new(nin, w1, 3, 1, 1, Activation::Relu, vb.pp("enc1"))?;
        let enc2 = Encoder::new(w1, w2, 3, 2, 1, vb.pp("enc2"))?;
        let enc3 = Encoder::new(w2, w3, 3, 2, 1, vb.pp("enc3"))?;
        let enc4 = Encoder::new(w3, w4, 3, 2, 1, vb.pp("enc4"))?;
        let enc5 = Encoder::new(w4, w5, 3, 2, 1, vb.pp("enc5"))?;

        let aspp = AsppModule::new(w5, w5, dilations, true, vb.pp("aspp"))?;

        let dec4 = Decoder::new(plan.dec4.0, plan.dec4.1, 3, 1, false, vb.pp("dec4"))?;
        let dec3 = Decoder::new(plan.dec3.0, plan.dec3.1, 3, 1, false, vb.pp("dec3"))?;
        let dec2 = Decoder::new(plan.dec2.0, plan.dec2.1, 3, 1, false, vb.pp("dec2"))?;
        let lstm_dec2 = LstmModule::new(w2, nin_lstm, nout_lstm, vb.pp("lstm_dec2"))?;
        let dec1 = Decoder::new(plan.dec1.0, plan.dec1.1, 3, 1, false, vb.pp("dec1"))?;

        // Each decoder must take exactly what flows into it.
        let feeds = [
            ("dec4", &dec4, aspp.out_channels() + enc4.out_channels()),
            ("dec3", &dec3, dec4.out_channels() + enc3.out_channels()),
            ("dec2", &dec2, dec3.out_channels() + enc2.out_channels()),
            ("dec1", &dec1, dec2.out_channels() + 1 + enc1.out_channels()),
        ];
        for (label, decoder, incoming) in feeds {
            if decoder.in_channels() != incoming {
                bail!(
                    "BaseNet at {}: {label} takes {} channels but receives {incoming}",
                    vb.prefix(),
                    decoder.in_channels()
                );
            }
        }

        tracing::debug!(
            prefix = %vb.prefix(),
            nin,
            nout,
            nin_lstm,
            nout_lstm,
            plan = ?plan,
            "base net"
        );

        Ok(Self {
            enc1,
            enc2,
            enc3,
            enc4,
            enc5,
            aspp,
            dec4,
            dec3,
            dec2,
            lstm_dec2,
            dec1,
            name: vb.prefix(),
        })
    }

    pub fn in_channels(&self) -> usize {
        self.enc1.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.dec1.out_channels()
    }
}

impl ModuleT for BaseNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let e1 = self.enc1.forward_t(xs, train)?;
        let e2 = self.enc2.forward_t(&e1, train)?;
        let e3 = self.enc3.forward_t(&e2, train)?;
        let e4 = self.enc4.forward_t(&e3, train)?;
        let e5 = self.enc5.forward_t(&e4, train)?;

        let hidden = self.aspp.forward_t(&e5, train)?;

        let hidden = self.dec4.forward_t(&hidden, &e4, train)?;
        let hidden = self.dec3.forward_t(&hidden, &e3, train)?;
        let hidden = self.dec2.forward_t(&hidden, &e2, train)?;

        // (batch, 2n, H/2, W) ++ (batch, 1, H/2, W)
        let recurrent = self.lstm_dec2.forward_t(&hidden, train)?;
        let hidden = Tensor::cat(&[&hidden, &recurrent], 1)?;

        let output = self.dec1.forward_t(&hidden, &e1, train)?;
        tracing::trace!(
            net = %self.name,
            input = ?xs.dims(),
            bottleneck = ?e5.dims(),
            output = ?output.dims(),
            "base net forward"
        );
        Ok(output)
    }
}
