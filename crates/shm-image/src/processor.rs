//! The computation behind the processor role.

use crate::handshake::{HandshakeError, Processor};
use crate::image::{Image, Rgb};
use crate::layout::OutputShape;

/// Turns one input image into one output image.
pub trait ImageProcessor {
    fn process(&mut self, input: &Image) -> Image;

    /// Dimensions of every output relative to its input. The requestor must
    /// be configured with the same shape, since the output area carries no
    /// dimensions.
    fn output_shape(&self) -> OutputShape {
        OutputShape::SameAsInput
    }
}

impl<F> ImageProcessor for F
where
    F: FnMut(&Image) -> Image,
{
    fn process(&mut self, input: &Image) -> Image {
        self(input)
    }
}

/// Returns the input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl ImageProcessor for Echo {
    fn process(&mut self, input: &Image) -> Image {
        input.clone()
    }
}

/// Reduces every row to its most frequent colour, giving a `rows × 1` image.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowColours;

impl ImageProcessor for RowColours {
    fn process(&mut self, input: &Image) -> Image {
        // Rows without columns have no colour to pick; they come out black.
        let pixels: Vec<Rgb> = if input.columns() == 0 {
            vec![Rgb::default(); input.rows()]
        } else {
            input
                .row_slices()
                .map(|row| dominant_colour(row).unwrap_or_default())
                .collect()
        };
        Image::new(input.rows(), 1, pixels).unwrap_or_else(|_| Image::empty())
    }

    fn output_shape(&self) -> OutputShape {
        OutputShape::RowsByOne
    }
}

/// Most frequent colour in `row`. Ties go to the colour seen first.
pub fn dominant_colour(row: &[Rgb]) -> Option<Rgb> {
    let mut counts: Vec<(Rgb, usize)> = Vec::new();
    for &pixel in row {
        match counts.iter_mut().find(|(colour, _)| *colour == pixel) {
            Some((_, n)) => *n += 1,
            None => counts.push((pixel, 1)),
        }
    }
    // `max_by_key` keeps the last maximum, so walk in reverse.
    counts
        .into_iter()
        .rev()
        .max_by_key(|&(_, n)| n)
        .map(|(colour, _)| colour)
}

impl<M> Processor<M> {
    /// Answer requests with `handler` until the requestor ends the session.
    ///
    /// Returns the number of exchanges served. Every request is completed so
    /// the requestor is never left waiting. An output whose dimensions break
    /// `handler`'s [`OutputShape`] is replaced by a black image of the agreed
    /// size. An undecodable input or an output that does not fit leaves the
    /// output area as it was.
    pub fn serve<P: ImageProcessor + ?Sized>(
        &mut self,
        handler: &mut P,
    ) -> Result<usize, HandshakeError> {
        let shape = handler.output_shape();
        let mut served = 0;
        while let Some(mut turn) = self.next_request()? {
            match turn.read_input() {
                Ok(input) => {
                    let (rows, columns) = shape.dimensions(input.rows(), input.columns());
                    let mut output = handler.process(&input);
                    if (output.rows(), output.columns()) != (rows, columns) {
                        tracing::error!(
                            rows = output.rows(),
                            columns = output.columns(),
                            expected_rows = rows,
                            expected_columns = columns,
                            "output breaks the agreed shape, answering with black"
                        );
                        output = Image::blank(rows, columns).unwrap_or_else(|_| Image::empty());
                    }
                    if let Err(error) = turn.write_output(&output) {
                        tracing::error!(%error, rows, columns, "output does not fit");
                    }
                }
                Err(error) => tracing::error!(%error, "undecodable input record"),
            }
            turn.complete()?;
            served += 1;
            tracing::debug!(served, "request served");
        }
        Ok(served)
    }
}
